//! Process-wide named service registry.
//!
//! Grounded in the teacher's `input_inject` global-injector shape
//! (`OnceLock<Mutex<Option<T>>>` lazily populated on first use) but
//! generalized from a single hardcoded injector to an arbitrary number of
//! named, independently start/stoppable services.

use std::collections::HashMap;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use rd_core::ServiceError;

/// A registrable unit of work. `start`/`stop` mirror the `Sink` contract's
/// shape (idempotent, join-before-return) without depending on `rd-core`'s
/// frame types — services are not necessarily part of the media graph.
pub trait Service: Send + Sync {
    fn start(&mut self) -> bool {
        true
    }
    fn stop(&mut self) {}
    fn is_running(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub descriptor: String,
    pub is_running: bool,
}

#[derive(Debug, Clone)]
pub struct ServiceMessage {
    pub sender: String,
    pub event: String,
    pub data: String,
}

struct QueuedTask {
    run: Box<dyn FnOnce() + Send>,
    delay: Duration,
}

/// Per-service deferred-task worker, created lazily on first
/// `enqueue_task`/`notify_main_service` call and torn down with the service.
struct TaskQueue {
    tx: Sender<QueuedTask>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TaskQueue {
    fn spawn() -> Self {
        let (tx, rx) = channel::<QueuedTask>();
        let thread = std::thread::spawn(move || {
            while let Ok(task) = rx.recv() {
                if !task.delay.is_zero() {
                    std::thread::sleep(task.delay);
                }
                (task.run)();
            }
        });
        Self { tx, thread: Some(thread) }
    }

    fn enqueue(&self, task: Box<dyn FnOnce() + Send>, delay: Duration) {
        if self.tx.send(QueuedTask { run: task, delay }).is_err() {
            warn!("service task queue: worker already gone, dropping task");
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Entry {
    descriptor: String,
    creator: Box<dyn Fn() -> Box<dyn Service> + Send + Sync>,
    instance: Option<Box<dyn Service>>,
    task_queue: Option<TaskQueue>,
}

impl Entry {
    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            descriptor: self.descriptor.clone(),
            is_running: self.instance.as_ref().map(|s| s.is_running()).unwrap_or(false),
        }
    }
}

struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    fn new() -> Self {
        Self { entries: HashMap::new() }
    }
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
static EVENT_CALLBACK: OnceLock<Mutex<Option<Arc<dyn Fn(ServiceMessage) + Send + Sync>>>> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| Mutex::new(Registry::new()))
}

fn event_callback_slot() -> &'static Mutex<Option<Arc<dyn Fn(ServiceMessage) + Send + Sync>>> {
    EVENT_CALLBACK.get_or_init(|| Mutex::new(None))
}

/// Registers `T::default()` as the service behind `descriptor`. Rejects a
/// descriptor already in use rather than silently overwriting it.
pub fn register<T>(descriptor: impl Into<String>) -> Result<(), ServiceError>
where
    T: Service + Default + 'static,
{
    let descriptor = descriptor.into();
    let mut reg = registry().lock();
    if reg.entries.contains_key(&descriptor) {
        return Err(ServiceError::DuplicateDescriptor(descriptor));
    }
    reg.entries.insert(
        descriptor.clone(),
        Entry { descriptor, creator: Box::new(|| Box::new(T::default())), instance: None, task_queue: None },
    );
    Ok(())
}

pub fn unregister(descriptor: &str) -> Result<(), ServiceError> {
    let mut reg = registry().lock();
    match reg.entries.remove(descriptor) {
        Some(mut entry) => {
            if let Some(instance) = entry.instance.as_mut() {
                instance.stop();
            }
            Ok(())
        }
        None => Err(ServiceError::NotFound(descriptor.to_owned())),
    }
}

pub fn start_service(descriptor: &str) -> Result<bool, ServiceError> {
    let mut reg = registry().lock();
    let entry = reg.entries.get_mut(descriptor).ok_or_else(|| ServiceError::NotFound(descriptor.to_owned()))?;
    if entry.instance.is_none() {
        entry.instance = Some((entry.creator)());
    }
    let started = entry.instance.as_mut().expect("just inserted").start();
    Ok(started)
}

pub fn stop_service(descriptor: &str) -> Result<(), ServiceError> {
    let mut reg = registry().lock();
    let entry = reg.entries.get_mut(descriptor).ok_or_else(|| ServiceError::NotFound(descriptor.to_owned()))?;
    if let Some(instance) = entry.instance.as_mut() {
        instance.stop();
    }
    entry.task_queue = None;
    Ok(())
}

pub fn start_all() -> usize {
    let mut reg = registry().lock();
    let mut started = 0;
    for entry in reg.entries.values_mut() {
        if entry.instance.is_none() {
            entry.instance = Some((entry.creator)());
        }
        if entry.instance.as_mut().expect("just inserted").start() {
            started += 1;
        }
    }
    started
}

pub fn stop_all() {
    let mut reg = registry().lock();
    for entry in reg.entries.values_mut() {
        if let Some(instance) = entry.instance.as_mut() {
            instance.stop();
        }
        entry.task_queue = None;
    }
}

pub fn is_service_running(descriptor: &str) -> bool {
    registry().lock().entries.get(descriptor).map(|e| e.info().is_running).unwrap_or(false)
}

pub fn get_service_info(descriptor: &str) -> Option<ServiceInfo> {
    registry().lock().entries.get(descriptor).map(Entry::info)
}

pub fn get_all_services() -> Vec<ServiceInfo> {
    registry().lock().entries.values().map(Entry::info).collect()
}

pub fn get_service_count() -> usize {
    registry().lock().entries.len()
}

pub fn set_event_callback(callback: impl Fn(ServiceMessage) + Send + Sync + 'static) {
    *event_callback_slot().lock() = Some(Arc::new(callback));
}

/// Schedules a task on `descriptor`'s task queue, creating the queue on
/// first use. `delay_us` of 0 runs as soon as the worker drains to it.
pub fn enqueue_task(descriptor: &str, delay_us: u64, task: impl FnOnce() + Send + 'static) -> Result<(), ServiceError> {
    let mut reg = registry().lock();
    let entry = reg.entries.get_mut(descriptor).ok_or_else(|| ServiceError::NotFound(descriptor.to_owned()))?;
    let queue = entry.task_queue.get_or_insert_with(TaskQueue::spawn);
    queue.enqueue(Box::new(task), Duration::from_micros(delay_us));
    Ok(())
}

/// Publishes `{sender, event, data}` to the registered event callback, routed
/// through `sender`'s own task queue so the callback runs off the caller's
/// (producer's) thread.
pub fn notify_main_service(sender: &str, event: &str, data: String) -> Result<(), ServiceError> {
    let message = ServiceMessage { sender: sender.to_owned(), event: event.to_owned(), data };
    enqueue_task(sender, 0, move || {
        if let Some(callback) = event_callback_slot().lock().clone() {
            callback(message);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[derive(Default)]
    struct ToggleService {
        running: bool,
    }

    impl Service for ToggleService {
        fn start(&mut self) -> bool {
            self.running = true;
            true
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn is_running(&self) -> bool {
            self.running
        }
    }

    fn unique_name(prefix: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!("{prefix}-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[test]
    fn register_start_stop_round_trip() {
        let name = unique_name("toggle");
        register::<ToggleService>(name.clone()).unwrap();
        assert!(!is_service_running(&name));
        assert!(start_service(&name).unwrap());
        assert!(is_service_running(&name));
        stop_service(&name).unwrap();
        assert!(!is_service_running(&name));
        unregister(&name).unwrap();
    }

    #[test]
    fn duplicate_register_is_rejected() {
        let name = unique_name("dup");
        register::<ToggleService>(name.clone()).unwrap();
        let err = register::<ToggleService>(name.clone()).unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateDescriptor(_)));
        unregister(&name).unwrap();
    }

    #[test]
    fn operating_on_unknown_descriptor_errors() {
        assert!(matches!(start_service("does-not-exist-xyz").unwrap_err(), ServiceError::NotFound(_)));
    }

    #[test]
    fn enqueue_task_runs_on_worker_thread() {
        let name = unique_name("queued");
        register::<ToggleService>(name.clone()).unwrap();
        let ran = StdArc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        enqueue_task(&name, 0, move || ran_clone.store(true, Ordering::SeqCst)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while !ran.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ran.load(Ordering::SeqCst));
        unregister(&name).unwrap();
    }

    #[test]
    fn notify_main_service_invokes_event_callback() {
        let name = unique_name("notifier");
        register::<ToggleService>(name.clone()).unwrap();
        let received = StdArc::new(Mutex::new(None));
        let received_clone = received.clone();
        set_event_callback(move |msg| *received_clone.lock() = Some(msg));

        notify_main_service(&name, "ping", "payload".to_owned()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while received.lock().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let msg = received.lock().clone().unwrap();
        assert_eq!(msg.sender, name);
        assert_eq!(msg.event, "ping");
        assert_eq!(msg.data, "payload");
        unregister(&name).unwrap();
    }

    #[test]
    fn start_all_and_stop_all_cover_every_registered_service() {
        let a = unique_name("all-a");
        let b = unique_name("all-b");
        register::<ToggleService>(a.clone()).unwrap();
        register::<ToggleService>(b.clone()).unwrap();
        let started = start_all();
        assert!(started >= 2);
        assert!(is_service_running(&a));
        assert!(is_service_running(&b));
        stop_all();
        assert!(!is_service_running(&a));
        assert!(!is_service_running(&b));
        unregister(&a).unwrap();
        unregister(&b).unwrap();
    }
}
