//! rd-encode — H.264/H.265 video encoder processor.
//!
//! The only processor in this workspace with a real internal worker: raw
//! frames are handed to a bounded queue by `on_frame` (non-blocking, drops
//! on overflow) and a dedicated thread drains it into a GStreamer
//! `appsrc ! <hw/sw encoder> ! appsink` pipeline. Encoded access units arrive
//! asynchronously on GStreamer's own streaming thread and are delivered
//! straight from that callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks, AppSrc};
use gstreamer_video::DownstreamForceKeyUnitEvent;

use rd_core::{EncoderConfig, Frame, FrameMeta, NodeId, PixelFormat, Sink, Source, VideoMeta};

mod gst_pipeline;

const QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Default, Clone, Copy)]
pub struct EncoderStats {
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub frames_encoded: u64,
}

struct Session {
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
    tx: SyncSender<Arc<Frame>>,
    worker: std::thread::JoinHandle<()>,
    bus_watcher: std::thread::JoinHandle<()>,
    eos_received: Arc<AtomicBool>,
}

pub struct VideoEncoder {
    id: NodeId,
    fan_out: Arc<rd_core::FanOut>,
    config: Mutex<EncoderConfig>,
    session: Mutex<Option<Session>>,
    force_keyframe_flag: Arc<AtomicBool>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    encoded: Arc<AtomicU64>,
}

impl VideoEncoder {
    pub fn new(config: EncoderConfig) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            fan_out: Arc::new(rd_core::FanOut::new()),
            config: Mutex::new(config),
            session: Mutex::new(None),
            force_keyframe_flag: Arc::new(AtomicBool::new(false)),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            encoded: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_enqueued: self.enqueued.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_encoded: self.encoded.load(Ordering::Relaxed),
        }
    }

    pub fn force_keyframe(&self) {
        self.force_keyframe_flag.store(true, Ordering::Relaxed);
    }

    pub fn set_bitrate(&self, bitrate: u32) {
        self.config.lock().bitrate = bitrate;
        if let Some(session) = self.session.lock().as_ref() {
            if let Some(encoder) = session.pipeline.by_name("enc") {
                if encoder.has_property("bitrate") {
                    encoder.set_property("bitrate", bitrate);
                } else {
                    warn!("encoder element has no 'bitrate' property; live adjustment skipped");
                }
            }
        }
    }

    pub fn update_config(&self, config: EncoderConfig) {
        let was_running = self.is_running();
        if was_running {
            self.stop();
        }
        *self.config.lock() = config;
        if was_running {
            self.start();
        }
    }

    /// Sends EOS and blocks (bounded) until the bus watcher observes it,
    /// draining whatever samples GStreamer still has in flight.
    pub fn flush(&self) {
        let Some(session) = self.session.lock().as_ref().map(|s| (s.appsrc.clone(), s.eos_received.clone())) else {
            return;
        };
        let (appsrc, eos_received) = session;
        let _ = appsrc.end_of_stream();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !eos_received.load(Ordering::Relaxed) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if !eos_received.load(Ordering::Relaxed) {
            warn!("encoder flush: timed out waiting for EOS to drain");
        }
    }

    fn build_session(&self) -> Option<Session> {
        if let Err(e) = gstreamer::init() {
            warn!("gstreamer init failed: {e}");
            return None;
        }

        let config = self.config.lock().clone();
        let selected = gst_pipeline::select_encoder(config.output_format);
        let launch = gst_pipeline::build_launch_string(&config, &selected);
        debug!("encoder pipeline: {launch}");

        let pipeline = match gstreamer::parse::launch(&launch) {
            Ok(el) => match el.downcast::<gstreamer::Pipeline>() {
                Ok(p) => p,
                Err(_) => {
                    warn!("encoder pipeline: parsed element was not a Pipeline");
                    return None;
                }
            },
            Err(e) => {
                warn!("encoder pipeline: parse failed: {e}");
                return None;
            }
        };

        let appsrc: AppSrc = match pipeline.by_name("src").and_then(|e| e.downcast::<AppSrc>().ok()) {
            Some(a) => a,
            None => {
                warn!("encoder pipeline: appsrc 'src' not found");
                return None;
            }
        };
        let appsink: AppSink = match pipeline.by_name("sink").and_then(|e| e.downcast::<AppSink>().ok()) {
            Some(a) => a,
            None => {
                warn!("encoder pipeline: appsink 'sink' not found");
                return None;
            }
        };

        let fan_out = self.fan_out.clone();
        let encoded = self.encoded.clone();
        let width = config.width;
        let height = config.height;
        let output_format = config.output_format;

        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gstreamer::FlowError::Error)?;

                    let timestamp = buffer.pts().map(|t| t.useconds() as i64).unwrap_or(0);
                    let is_keyframe = !buffer.flags().contains(gstreamer::BufferFlags::DELTA_UNIT);

                    let map = buffer.map_readable().map_err(|_| gstreamer::FlowError::Error)?;
                    let bytes = bytes::Bytes::copy_from_slice(map.as_slice());

                    let frame = Frame {
                        bytes,
                        format: output_format,
                        timestamp,
                        meta: FrameMeta::Video(VideoMeta {
                            width,
                            height,
                            framerate: 0,
                            is_keyframe,
                            stride: None,
                        }),
                    };
                    encoded.fetch_add(1, Ordering::Relaxed);
                    fan_out.deliver(Arc::new(frame));
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            warn!("encoder pipeline: failed to reach Playing: {e}");
            return None;
        }

        let eos_received = Arc::new(AtomicBool::new(false));
        let eos_received_watcher = eos_received.clone();
        let pipeline_weak = pipeline.downgrade();
        let bus_watcher = std::thread::spawn(move || {
            let Some(pipeline) = pipeline_weak.upgrade() else { return };
            let Some(bus) = pipeline.bus() else { return };
            loop {
                match bus.timed_pop(gstreamer::ClockTime::from_seconds(1)) {
                    Some(msg) => match msg.view() {
                        gstreamer::MessageView::Eos(_) => {
                            eos_received_watcher.store(true, Ordering::Relaxed);
                            break;
                        }
                        gstreamer::MessageView::Error(e) => {
                            warn!("encoder pipeline error: {}", e.error());
                            break;
                        }
                        _ => {}
                    },
                    None => {}
                }
            }
        });

        let (tx, rx): (SyncSender<Arc<Frame>>, Receiver<Arc<Frame>>) = sync_channel(QUEUE_CAPACITY);
        let appsrc_worker = appsrc.clone();
        let force_keyframe_flag = self.force_keyframe_flag.clone();
        let worker = std::thread::spawn(move || {
            while let Ok(frame) = rx.recv() {
                if force_keyframe_flag.swap(false, Ordering::Relaxed) {
                    let event = DownstreamForceKeyUnitEvent::builder().all_headers(true).build();
                    let _ = appsrc_worker.send_event(event);
                }
                if let Err(e) = push_frame(&appsrc_worker, &frame) {
                    warn!("encoder: failed to push frame into appsrc: {e}");
                }
            }
        });

        info!("encoder session started ({} -> {:?})", config.input_format_name(), config.output_format);
        Some(Session { pipeline, appsrc, tx, worker, bus_watcher, eos_received })
    }
}

fn push_frame(appsrc: &AppSrc, frame: &Frame) -> Result<(), String> {
    let mut buffer = gstreamer::Buffer::with_size(frame.bytes.len()).map_err(|e| e.to_string())?;
    {
        let buffer_mut = buffer.get_mut().ok_or("buffer not uniquely owned")?;
        buffer_mut.set_pts(gstreamer::ClockTime::from_useconds(frame.timestamp.max(0) as u64));
        let mut map = buffer_mut.map_writable().map_err(|e| e.to_string())?;
        map.copy_from_slice(&frame.bytes);
    }
    appsrc.push_buffer(buffer).map(|_| ()).map_err(|e| format!("{e:?}"))
}

trait InputFormatName {
    fn input_format_name(&self) -> &'static str;
}
impl InputFormatName for EncoderConfig {
    fn input_format_name(&self) -> &'static str {
        match self.input_format {
            PixelFormat::I420 => "I420",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Bgra32 => "BGRA32",
            PixelFormat::Rgba32 => "RGBA32",
            _ => "unknown",
        }
    }
}

impl Source for VideoEncoder {
    fn id(&self) -> NodeId {
        self.id
    }
    fn fan_out(&self) -> &rd_core::FanOut {
        &self.fan_out
    }
}

impl Sink for VideoEncoder {
    fn id(&self) -> NodeId {
        self.id
    }

    fn start(&self) -> bool {
        if self.session.lock().is_some() {
            return true;
        }
        match self.build_session() {
            Some(session) => {
                *self.session.lock() = Some(session);
                true
            }
            None => false,
        }
    }

    fn stop(&self) {
        let Some(session) = self.session.lock().take() else { return };
        drop(session.tx);
        let _ = session.worker.join();
        let _ = session.pipeline.set_state(gstreamer::State::Null);
        let _ = session.bus_watcher.join();
    }

    fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    fn on_frame(&self, frame: Arc<Frame>) {
        if !frame.format.is_video() || !frame.is_valid() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match session.tx.try_send(frame) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EncoderConfig {
        EncoderConfig {
            width: 640,
            height: 480,
            fps: 30,
            bitrate: 2000,
            keyframe_interval: 60,
            input_format: PixelFormat::I420,
            output_format: PixelFormat::H264,
        }
    }

    #[test]
    fn on_frame_without_running_session_is_dropped() {
        let encoder = VideoEncoder::new(config());
        let frame = Frame::new_video(
            bytes::Bytes::from(vec![0u8; 16]),
            PixelFormat::I420,
            0,
            VideoMeta { width: 4, height: 4, framerate: 30, is_keyframe: false, stride: None },
        );
        encoder.on_frame(frame);
        assert_eq!(encoder.stats().frames_dropped, 1);
        assert_eq!(encoder.stats().frames_enqueued, 0);
    }

    #[test]
    fn invalid_frame_is_dropped_before_touching_the_queue() {
        let encoder = VideoEncoder::new(config());
        let frame = Frame::new_video(
            bytes::Bytes::new(),
            PixelFormat::I420,
            0,
            VideoMeta { width: 4, height: 4, framerate: 30, is_keyframe: false, stride: None },
        );
        encoder.on_frame(frame);
        assert_eq!(encoder.stats().frames_dropped, 1);
    }

    #[test]
    fn force_keyframe_sets_flag_until_consumed() {
        let encoder = VideoEncoder::new(config());
        encoder.force_keyframe();
        assert!(encoder.force_keyframe_flag.swap(false, Ordering::Relaxed));
        assert!(!encoder.force_keyframe_flag.load(Ordering::Relaxed));
    }

    #[test]
    fn set_bitrate_updates_config_even_without_a_session() {
        let encoder = VideoEncoder::new(config());
        encoder.set_bitrate(5000);
        assert_eq!(encoder.config.lock().bitrate, 5000);
    }
}
