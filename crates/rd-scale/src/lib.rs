//! rd-scale — resamples video frames to a target resolution.
//!
//! Bilinear interpolation is the only algorithm implemented; other
//! algorithms selected in `ScalerConfig` are accepted but currently fall
//! back to bilinear rather than being rejected outright, since a decoder
//! downstream cares about dimensions, not which resampling kernel produced
//! them.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use rd_core::{Frame, FrameMeta, NodeId, PixelFormat, ScalerConfig, Sink, Source, VideoMeta};

mod resample;

/// Running counters plus an exponentially-smoothed timing estimate so a
/// caller can watch scaling cost without paying for a per-frame histogram.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalerStats {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub avg_scaling_time_micros: f64,
}

struct Inner {
    config: ScalerConfig,
    stats: ScalerStats,
}

pub struct VideoScaler {
    id: NodeId,
    fan_out: rd_core::FanOut,
    inner: Mutex<Inner>,
}

const EMA_ALPHA: f64 = 0.1;

impl VideoScaler {
    pub fn new(config: ScalerConfig) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            fan_out: rd_core::FanOut::new(),
            inner: Mutex::new(Inner { config, stats: ScalerStats::default() }),
        })
    }

    pub fn stats(&self) -> ScalerStats {
        self.inner.lock().stats
    }

    pub fn set_target(&self, width: u32, height: u32) {
        let mut inner = self.inner.lock();
        inner.config.target_width = width;
        inner.config.target_height = height;
    }

    pub fn config(&self) -> ScalerConfig {
        self.inner.lock().config.clone()
    }

    fn record_timing(stats: &mut ScalerStats, elapsed_micros: f64) {
        if stats.frames_processed == 0 {
            stats.avg_scaling_time_micros = elapsed_micros;
        } else {
            stats.avg_scaling_time_micros =
                stats.avg_scaling_time_micros * (1.0 - EMA_ALPHA) + elapsed_micros * EMA_ALPHA;
        }
    }
}

impl Source for VideoScaler {
    fn id(&self) -> NodeId {
        self.id
    }
    fn fan_out(&self) -> &rd_core::FanOut {
        &self.fan_out
    }
}

impl Sink for VideoScaler {
    fn id(&self) -> NodeId {
        self.id
    }

    /// Rejects a target of `(0, h)` or `(w, 0)` rather than waiting for the
    /// first frame to silently drop.
    fn initialize(&self) -> bool {
        self.inner.lock().config.is_valid()
    }

    fn on_frame(&self, frame: Arc<Frame>) {
        if !frame.format.is_video() || !frame.is_valid() {
            self.inner.lock().stats.frames_dropped += 1;
            return;
        }
        let Some(vm) = frame.video_meta() else {
            self.inner.lock().stats.frames_dropped += 1;
            return;
        };

        let channels = match frame.format.bytes_per_pixel() {
            Some(bpp) if matches!(frame.format, PixelFormat::Bgra32 | PixelFormat::Rgba32) => bpp as usize,
            _ => {
                debug!("scaler: unsupported input format {:?}", frame.format);
                self.inner.lock().stats.frames_dropped += 1;
                return;
            }
        };

        let (target_w, target_h, maintain_aspect) = {
            let cfg = &self.inner.lock().config;
            (cfg.target_width, cfg.target_height, cfg.maintain_aspect_ratio)
        };

        let (out_w, out_h) = if maintain_aspect {
            resample::fit_preserving_aspect(vm.width, vm.height, target_w, target_h)
        } else {
            (target_w, target_h)
        };

        if out_w == vm.width && out_h == vm.height {
            let mut inner = self.inner.lock();
            inner.stats.frames_processed += 1;
            drop(inner);
            self.deliver(frame);
            return;
        }

        let start = Instant::now();
        let resized = resample::bilinear_resize(
            &frame.bytes,
            vm.width as usize,
            vm.height as usize,
            out_w as usize,
            out_h as usize,
            channels,
        );
        let elapsed_micros = start.elapsed().as_micros() as f64;

        let out_meta = VideoMeta { width: out_w, height: out_h, stride: None, ..vm };
        let out_frame = Frame {
            bytes: bytes::Bytes::from(resized),
            format: frame.format,
            timestamp: frame.timestamp,
            meta: FrameMeta::Video(out_meta),
        };

        {
            let mut inner = self.inner.lock();
            inner.stats.frames_processed += 1;
            Self::record_timing(&mut inner.stats, elapsed_micros);
        }
        self.deliver(Arc::new(out_frame));
    }
}
