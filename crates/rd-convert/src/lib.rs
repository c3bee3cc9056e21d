//! rd-convert — pixel-format conversion processor.
//!
//! Supported formats: `{Rgb24, Bgr24, Rgba32, Bgra32, I420}`. When the input
//! format already equals the configured output format, the frame is
//! forwarded unchanged — the same `Arc` the producer handed us, not a copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use rd_core::{ConverterConfig, Frame, FrameMeta, NodeId, PixelFormat, Sink, Source, VideoMeta};

mod convert;

/// Point-in-time conversion statistics, guarded by its own lock so updating
/// stats never blocks delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConverterStats {
    pub frames_processed: u64,
    pub frames_dropped: u64,
}

pub struct PixelFormatConverter {
    id: NodeId,
    fan_out: rd_core::FanOut,
    config: RwLock<ConverterConfig>,
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl PixelFormatConverter {
    pub fn new(config: ConverterConfig) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            fan_out: rd_core::FanOut::new(),
            config: RwLock::new(config),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Idempotent beyond the first observable effect: setting the same
    /// format twice in a row has no additional effect.
    pub fn set_output_format(&self, format: PixelFormat) {
        let mut cfg = self.config.write();
        if cfg.output_format != format {
            cfg.output_format = format;
        }
    }

    pub fn output_format(&self) -> PixelFormat {
        self.config.read().output_format
    }

    pub fn stats(&self) -> ConverterStats {
        ConverterStats {
            frames_processed: self.processed.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn bump_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn bump_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Source for PixelFormatConverter {
    fn id(&self) -> NodeId {
        self.id
    }
    fn fan_out(&self) -> &rd_core::FanOut {
        &self.fan_out
    }
}

impl Sink for PixelFormatConverter {
    fn id(&self) -> NodeId {
        self.id
    }

    fn on_frame(&self, frame: Arc<Frame>) {
        if !frame.format.is_video() || !frame.is_valid() {
            self.bump_dropped();
            return;
        }
        let Some(vm) = frame.video_meta() else {
            self.bump_dropped();
            return;
        };

        let output_format = self.output_format();

        // Zero-copy forward: same reference, not a copy.
        if frame.format == output_format {
            self.bump_processed();
            self.deliver(frame);
            return;
        }

        match convert::convert(frame.format, output_format, &frame.bytes, vm) {
            Some((bytes, out_meta)) => {
                self.bump_processed();
                let out = Frame {
                    bytes,
                    format: output_format,
                    timestamp: frame.timestamp,
                    meta: FrameMeta::Video(out_meta),
                };
                self.deliver(Arc::new(out));
            }
            None => {
                debug!(
                    "converter: unsupported or rejected conversion {:?} -> {:?}",
                    frame.format, output_format
                );
                self.bump_dropped();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rd_core::{Frame, VideoMeta};
    use std::sync::atomic::AtomicUsize;

    struct CollectSink {
        id: NodeId,
        frames: parking_lot::Mutex<Vec<Arc<Frame>>>,
        calls: AtomicUsize,
    }
    impl CollectSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { id: NodeId::next(), frames: parking_lot::Mutex::new(Vec::new()), calls: AtomicUsize::new(0) })
        }
    }
    impl Sink for CollectSink {
        fn id(&self) -> NodeId {
            self.id
        }
        fn on_frame(&self, frame: Arc<Frame>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.frames.lock().push(frame);
        }
    }

    fn bgra_frame(w: u32, h: u32, bgra: [u8; 4]) -> Arc<Frame> {
        let mut bytes = Vec::with_capacity((w * h * 4) as usize);
        for _ in 0..(w * h) {
            bytes.extend_from_slice(&bgra);
        }
        Frame::new_video(
            Bytes::from(bytes),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: w, height: h, framerate: 30, is_keyframe: false, stride: None },
        )
    }

    #[test]
    fn same_format_forwards_same_reference() {
        let converter = PixelFormatConverter::new(ConverterConfig {
            input_format: PixelFormat::Bgra32,
            output_format: PixelFormat::Bgra32,
            enable_threading: false,
        });
        let sink = CollectSink::new();
        converter.add_sink(sink.clone());

        let frame = bgra_frame(2, 2, [1, 2, 3, 4]);
        let ptr_before = Arc::as_ptr(&frame);
        converter.on_frame(frame);

        let received = sink.frames.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(Arc::as_ptr(&received[0]), ptr_before);
    }

    #[test]
    fn bgra_to_rgba_roundtrip_is_byte_identical() {
        let to_rgba = PixelFormatConverter::new(ConverterConfig {
            input_format: PixelFormat::Bgra32,
            output_format: PixelFormat::Rgba32,
            enable_threading: false,
        });
        let back_to_bgra = PixelFormatConverter::new(ConverterConfig {
            input_format: PixelFormat::Rgba32,
            output_format: PixelFormat::Bgra32,
            enable_threading: false,
        });
        to_rgba.add_sink(back_to_bgra.clone());
        let sink = CollectSink::new();
        back_to_bgra.add_sink(sink.clone());

        let original = bgra_frame(3, 3, [10, 20, 30, 255]);
        let original_bytes = original.bytes.clone();
        to_rgba.on_frame(original);

        let received = sink.frames.lock();
        assert_eq!(received[0].bytes, original_bytes);
    }

    #[test]
    fn bgra_to_i420_matches_bt601_worked_example() {
        // 4x2 solid blue (B=255,G=0,R=0).
        let converter = PixelFormatConverter::new(ConverterConfig {
            input_format: PixelFormat::Bgra32,
            output_format: PixelFormat::I420,
            enable_threading: false,
        });
        let sink = CollectSink::new();
        converter.add_sink(sink.clone());

        let frame = bgra_frame(4, 2, [255, 0, 0, 255]);
        converter.on_frame(frame);

        let received = sink.frames.lock();
        assert_eq!(received.len(), 1);
        let out = &received[0];
        assert_eq!(out.format, PixelFormat::I420);
        assert_eq!(out.bytes.len(), 12);

        let y_plane = &out.bytes[0..8];
        let u_plane = &out.bytes[8..10];
        let v_plane = &out.bytes[10..12];
        assert!(y_plane.iter().all(|&y| y == 29));
        assert!(u_plane.iter().all(|&u| u == 255));
        assert!(v_plane.iter().all(|&v| v == 107));
    }

    #[test]
    fn odd_dimensions_rejected_for_i420_output() {
        let converter = PixelFormatConverter::new(ConverterConfig {
            input_format: PixelFormat::Bgra32,
            output_format: PixelFormat::I420,
            enable_threading: false,
        });
        let sink = CollectSink::new();
        converter.add_sink(sink.clone());

        let frame = bgra_frame(3, 3, [0, 0, 0, 255]);
        converter.on_frame(frame);

        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert_eq!(converter.stats().frames_dropped, 1);
    }

    #[test]
    fn set_output_format_is_idempotent() {
        let converter = PixelFormatConverter::new(ConverterConfig {
            input_format: PixelFormat::Bgra32,
            output_format: PixelFormat::Bgra32,
            enable_threading: false,
        });
        converter.set_output_format(PixelFormat::Rgba32);
        converter.set_output_format(PixelFormat::Rgba32);
        assert_eq!(converter.output_format(), PixelFormat::Rgba32);
    }
}
