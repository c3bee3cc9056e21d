//! Node-graph capabilities: [`Source`], [`Sink`], [`Processor`].
//!
//! Capability interfaces, not an inheritance hierarchy — a processor composes
//! a `Source` (its fan-out) with a `Sink` impl rather than inheriting either.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::frame::Frame;

// MARK: - NodeId

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable, process-lifetime-unique, purely diagnostic node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

// MARK: - Sink

/// A terminal (or intermediate, via [`Processor`]) consumer of frames.
///
/// Sinks must be reentrant or serialize internally: [`Source::deliver`] may be
/// called concurrently from multiple threads and invokes `on_frame` directly
/// on the producer's thread. A sink must not panic out of `on_frame` — a
/// misbehaving sink is a programming bug, not a recoverable error.
pub trait Sink: Send + Sync {
    fn id(&self) -> NodeId;

    fn initialize(&self) -> bool {
        true
    }

    /// Default: always "ready" — most sinks are passive. Active sinks (e.g.
    /// the encoder's worker) override this.
    fn start(&self) -> bool {
        true
    }

    fn stop(&self) {}

    fn is_running(&self) -> bool {
        true
    }

    /// Delivered frame. Sinks that are not running must ignore it silently.
    fn on_frame(&self, frame: Arc<Frame>);
}

// MARK: - Source / fan-out

/// Ordered, duplicate-rejecting fan-out list of sinks, guarded by a
/// reader-writer lock: `deliver` takes the read side, structural changes
/// (`add`/`remove`/`clear`) take the write side.
pub struct FanOut {
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
}

impl Default for FanOut {
    fn default() -> Self {
        Self { sinks: RwLock::new(Vec::new()) }
    }
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects duplicates by identity (`NodeId`).
    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        let mut sinks = self.sinks.write();
        if sinks.iter().any(|s| s.id() == sink.id()) {
            return;
        }
        sinks.push(sink);
    }

    pub fn remove_sink(&self, id: NodeId) {
        self.sinks.write().retain(|s| s.id() != id);
    }

    pub fn clear_sinks(&self) {
        self.sinks.write().clear();
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn has_sinks(&self) -> bool {
        !self.sinks.read().is_empty()
    }

    /// Drops invalid frames silently (a legitimate probe, not an error) and
    /// otherwise invokes every sink's `on_frame` in insertion order, passing
    /// the same `Arc` to each — zero-copy fan-out.
    pub fn deliver(&self, frame: Arc<Frame>) {
        if !frame.is_valid() {
            return;
        }
        let sinks = self.sinks.read();
        for sink in sinks.iter() {
            sink.on_frame(Arc::clone(&frame));
        }
    }
}

/// A producer of frames. The only producer-visible emit primitive is
/// [`Source::deliver`]; `add_sink`/`remove_sink`/`clear_sinks`/`sink_count`/
/// `has_sinks` manage the fan-out set.
pub trait Source: Send + Sync {
    fn id(&self) -> NodeId;
    fn fan_out(&self) -> &FanOut;

    fn add_sink(&self, sink: Arc<dyn Sink>) {
        self.fan_out().add_sink(sink);
    }

    fn remove_sink(&self, id: NodeId) {
        self.fan_out().remove_sink(id);
    }

    fn clear_sinks(&self) {
        self.fan_out().clear_sinks();
    }

    fn sink_count(&self) -> usize {
        self.fan_out().sink_count()
    }

    fn has_sinks(&self) -> bool {
        self.fan_out().has_sinks()
    }

    fn deliver(&self, frame: Arc<Frame>) {
        self.fan_out().deliver(frame);
    }
}

// MARK: - Processor

/// A node that is both a [`Sink`] (upstream-facing) and a [`Source`]
/// (downstream-facing). Processors are passive and data-driven by default:
/// `start`/`stop` are no-ops and `on_frame` publishes zero or more derived
/// frames synchronously via `deliver`. The encoder is the documented
/// exception that runs an internal worker and needs real start/stop.
pub trait Processor: Source + Sink {}

impl<T: Source + Sink> Processor for T {}

/// Logs a misbehaving-sink panic instead of letting it unwind across the
/// fan-out loop, for use by `Source` impls that want defense-in-depth beyond
/// the "programmer error" contract.
pub fn report_sink_panic(sink_id: NodeId, payload: &(dyn std::any::Any + Send)) {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_owned());
    warn!("sink {} panicked in on_frame: {}", sink_id, msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, VideoMeta};
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        id: NodeId,
        count: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { id: NodeId::next(), count: AtomicUsize::new(0) })
        }
    }

    impl Sink for CountingSink {
        fn id(&self) -> NodeId {
            self.id
        }
        fn on_frame(&self, _frame: Arc<Frame>) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_frame() -> Arc<Frame> {
        Frame::new_video(
            Bytes::from(vec![0u8; 16]),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 2, height: 2, framerate: 30, is_keyframe: false, stride: None },
        )
    }

    #[test]
    fn duplicate_add_sink_rejected_by_identity() {
        let fan_out = FanOut::new();
        let sink = CountingSink::new();
        fan_out.add_sink(sink.clone());
        fan_out.add_sink(sink.clone());
        assert_eq!(fan_out.sink_count(), 1);
    }

    #[test]
    fn deliver_invokes_sinks_in_insertion_order() {
        let fan_out = FanOut::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        struct OrderedSink {
            id: NodeId,
            tag: u32,
            order: Arc<parking_lot::Mutex<Vec<u32>>>,
        }
        impl Sink for OrderedSink {
            fn id(&self) -> NodeId {
                self.id
            }
            fn on_frame(&self, _frame: Arc<Frame>) {
                self.order.lock().push(self.tag);
            }
        }

        for tag in 0..5 {
            fan_out.add_sink(Arc::new(OrderedSink { id: NodeId::next(), tag, order: order.clone() }));
        }
        fan_out.deliver(test_frame());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn invalid_frame_dropped_silently() {
        let fan_out = FanOut::new();
        let sink = CountingSink::new();
        fan_out.add_sink(sink.clone());

        let invalid = Frame::new_video(
            Bytes::new(),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 2, height: 2, framerate: 30, is_keyframe: false, stride: None },
        );
        fan_out.deliver(invalid);
        assert_eq!(sink.count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_and_clear_sinks() {
        let fan_out = FanOut::new();
        let a = CountingSink::new();
        let b = CountingSink::new();
        fan_out.add_sink(a.clone());
        fan_out.add_sink(b.clone());
        assert_eq!(fan_out.sink_count(), 2);

        fan_out.remove_sink(a.id());
        assert_eq!(fan_out.sink_count(), 1);

        fan_out.clear_sinks();
        assert_eq!(fan_out.sink_count(), 0);
    }
}
