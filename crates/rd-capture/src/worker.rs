//! Common capture worker loop, shared by every platform backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Owns the background thread that ticks a backend's `capture_one_frame`
/// closure at roughly `frame_rate` Hz.
pub struct WorkerHandle {
    should_stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns the loop: records `last_frame_time`, then while not stopped,
    /// calls `capture_one_frame` once `elapsed >= frame_interval` and
    /// otherwise sleeps ~1ms to avoid busy-waiting.
    pub fn spawn<F>(frame_rate: u32, mut capture_one_frame: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop_flag = should_stop.clone();
        let frame_interval = Duration::from_millis(1000 / frame_rate.max(1) as u64);

        let thread = std::thread::spawn(move || {
            let mut last_frame_time = Instant::now();
            while !stop_flag.load(Ordering::Relaxed) {
                let elapsed = last_frame_time.elapsed();
                if elapsed >= frame_interval {
                    if !capture_one_frame() {
                        tracing::debug!("capture worker: capture_one_frame reported failure");
                    }
                    last_frame_time = Instant::now();
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        });

        Self { should_stop, thread: Some(thread) }
    }

    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && !self.should_stop.load(Ordering::Relaxed)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn worker_ticks_and_stops_cleanly() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut worker = WorkerHandle::spawn(1000, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            true
        });
        std::thread::sleep(Duration::from_millis(20));
        worker.stop();
        assert!(count.load(Ordering::SeqCst) > 0);
        assert!(!worker.is_running());
    }

    #[test]
    fn stop_before_any_tick_is_safe() {
        let mut worker = WorkerHandle::spawn(1, || true);
        worker.stop();
        assert!(!worker.is_running());
    }
}
