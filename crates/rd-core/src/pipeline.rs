//! Thin builder that owns one source, an ordered list of processors, and one
//! terminal sink, linking them into a chain and orchestrating lifecycle.

use std::sync::Arc;

use tracing::{info, warn};

use crate::node::{NodeId, Processor, Sink, Source};

/// A processor's dual view: the same concrete node coerced once into its
/// `Source` half (to drive downstream) and once into its `Sink` half (to
/// receive upstream and to start/stop). Built from a single `Arc<P>` so both
/// views are ordinary unsized coercions from a concrete type rather than a
/// trait-object-to-trait-object upcast.
struct ProcessorNode {
    as_source: Arc<dyn Source>,
    as_sink: Arc<dyn Sink>,
}

/// Assembles `source → processor[0] → … → processor[n-1] → sink` and drives
/// its start/stop order.
pub struct Pipeline {
    source: Option<Arc<dyn Source>>,
    processors: Vec<ProcessorNode>,
    sink: Option<Arc<dyn Sink>>,
    linked: bool,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self { source: None, processors: Vec::new(), sink: None, linked: false }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source(&mut self, source: Arc<dyn Source>) {
        self.source = Some(source);
        self.linked = false;
    }

    pub fn set_sink(&mut self, sink: Arc<dyn Sink>) {
        self.sink = Some(sink);
        self.linked = false;
    }

    /// Order of addition = order in chain.
    pub fn add_processor<P: Processor + 'static>(&mut self, processor: Arc<P>) {
        let as_source: Arc<dyn Source> = processor.clone();
        let as_sink: Arc<dyn Sink> = processor;
        self.processors.push(ProcessorNode { as_source, as_sink });
        self.linked = false;
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some() && self.sink.is_some()
    }

    pub fn component_count(&self) -> usize {
        self.processors.len() + self.source.is_some() as usize + self.sink.is_some() as usize
    }

    /// `source → p0 → p1 → … → pn-1 → sink`. Idempotent: re-linking first
    /// clears every upstream's fan-out so edges are never duplicated.
    pub fn link_all(&mut self) -> bool {
        let (Some(source), Some(sink)) = (self.source.clone(), self.sink.clone()) else {
            warn!("link_all: source and sink must both be set");
            return false;
        };

        self.unlink_all();

        if self.processors.is_empty() {
            source.add_sink(sink);
        } else {
            source.add_sink(Arc::clone(&self.processors[0].as_sink));
            for pair in self.processors.windows(2) {
                pair[0].as_source.add_sink(Arc::clone(&pair[1].as_sink));
            }
            let last = self.processors.last().expect("non-empty");
            last.as_source.add_sink(sink);
        }

        self.linked = true;
        true
    }

    /// Clears every upstream's fan-out set.
    pub fn unlink_all(&mut self) {
        if let Some(source) = &self.source {
            source.clear_sinks();
        }
        for p in &self.processors {
            p.as_source.clear_sinks();
        }
        self.linked = false;
    }

    pub fn clear(&mut self) {
        self.unlink_all();
        self.source = None;
        self.processors.clear();
        self.sink = None;
    }

    /// Starts sink, then processors in forward order, then source last
    /// (consumers ready before the producer may fire). Returns `false` on
    /// first failure **without** rolling back already-started components;
    /// callers must still call `stop()`.
    ///
    /// The source itself is not `start`able through this trait: capture
    /// engines expose their own `start`/`stop` and the caller is
    /// responsible for starting the engine after `Pipeline::start` returns,
    /// matching the "producer may fire immediately" ordering rationale.
    pub fn start(&mut self) -> bool {
        if !self.linked && !self.link_all() {
            return false;
        }

        if let Some(sink) = &self.sink {
            if !sink.start() {
                warn!("pipeline start: sink failed to start");
                return false;
            }
        }
        for p in &self.processors {
            if !p.as_sink.start() {
                warn!("pipeline start: processor failed to start");
                return false;
            }
        }
        info!("pipeline started ({} components)", self.component_count());
        true
    }

    /// Stops processors, then sink. Idempotent. The source's own `stop()`
    /// (on the concrete capture engine) must be called by the caller first —
    /// see `start`'s note on source lifecycle.
    pub fn stop(&mut self) {
        for p in &self.processors {
            p.as_sink.stop();
        }
        if let Some(sink) = &self.sink {
            sink.stop();
        }
        info!("pipeline stopped");
    }

    pub fn pipeline_info(&self) -> String {
        format!(
            "Pipeline(source={}, processors={}, sink={}, linked={})",
            self.source.is_some(),
            self.processors.len(),
            self.sink.is_some(),
            self.linked
        )
    }

    pub fn sink_id(&self) -> Option<NodeId> {
        self.sink.as_ref().map(|s| s.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelFormat, VideoMeta};
    use crate::node::FanOut;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        id: NodeId,
        fan_out: FanOut,
    }
    impl Source for StubSource {
        fn id(&self) -> NodeId {
            self.id
        }
        fn fan_out(&self) -> &FanOut {
            &self.fan_out
        }
    }

    struct CountingSink {
        id: NodeId,
        count: AtomicUsize,
    }
    impl Sink for CountingSink {
        fn id(&self) -> NodeId {
            self.id
        }
        fn on_frame(&self, _frame: Arc<crate::frame::Frame>) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A passive pass-through processor: forwards whatever it receives.
    struct PassThrough {
        id: NodeId,
        fan_out: FanOut,
    }
    impl Source for PassThrough {
        fn id(&self) -> NodeId {
            self.id
        }
        fn fan_out(&self) -> &FanOut {
            &self.fan_out
        }
    }
    impl Sink for PassThrough {
        fn id(&self) -> NodeId {
            self.id
        }
        fn on_frame(&self, frame: Arc<crate::frame::Frame>) {
            self.deliver(frame);
        }
    }

    fn frame() -> Arc<Frame> {
        Frame::new_video(
            Bytes::from(vec![0u8; 16]),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 2, height: 2, framerate: 30, is_keyframe: false, stride: None },
        )
    }

    #[test]
    fn link_all_is_idempotent() {
        let source = Arc::new(StubSource { id: NodeId::next(), fan_out: FanOut::new() });
        let sink = Arc::new(CountingSink { id: NodeId::next(), count: AtomicUsize::new(0) });

        let mut pipeline = Pipeline::new();
        pipeline.set_source(source.clone());
        pipeline.set_sink(sink.clone());
        assert!(pipeline.link_all());
        assert!(pipeline.link_all());

        assert_eq!(source.sink_count(), 1);
        source.deliver(frame());
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_then_stop_is_a_noop() {
        let source = Arc::new(StubSource { id: NodeId::next(), fan_out: FanOut::new() });
        let sink = Arc::new(CountingSink { id: NodeId::next(), count: AtomicUsize::new(0) });
        let mut pipeline = Pipeline::new();
        pipeline.set_source(source);
        pipeline.set_sink(sink);
        assert!(pipeline.start());
        pipeline.stop();
        pipeline.stop();
    }

    #[test]
    fn start_requires_source_and_sink() {
        let mut pipeline = Pipeline::new();
        assert!(!pipeline.start());
    }

    #[test]
    fn unlink_all_clears_fan_out() {
        let source = Arc::new(StubSource { id: NodeId::next(), fan_out: FanOut::new() });
        let sink = Arc::new(CountingSink { id: NodeId::next(), count: AtomicUsize::new(0) });
        let mut pipeline = Pipeline::new();
        pipeline.set_source(source.clone());
        pipeline.set_sink(sink);
        pipeline.link_all();
        assert_eq!(source.sink_count(), 1);
        pipeline.unlink_all();
        assert_eq!(source.sink_count(), 0);
    }

    #[test]
    fn chain_through_one_processor() {
        let source = Arc::new(StubSource { id: NodeId::next(), fan_out: FanOut::new() });
        let processor = Arc::new(PassThrough { id: NodeId::next(), fan_out: FanOut::new() });
        let sink = Arc::new(CountingSink { id: NodeId::next(), count: AtomicUsize::new(0) });

        let mut pipeline = Pipeline::new();
        pipeline.set_source(source.clone());
        pipeline.add_processor(processor);
        pipeline.set_sink(sink.clone());
        assert!(pipeline.link_all());

        source.deliver(frame());
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }
}
