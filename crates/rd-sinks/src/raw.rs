//! Dumps raw frame payloads (BGRA/RGBA/I420/NV12/...) to a single file, one
//! frame's bytes after another with no framing — the layout `ffplay -f
//! rawvideo` expects when given matching `-pixel_format`/`-video_size` flags.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use rd_core::{Frame, NodeId, Sink};

use crate::{SinkError, SinkStats};

pub struct RawDumper {
    id: NodeId,
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_written: AtomicU64,
}

impl RawDumper {
    pub fn new(path: impl AsRef<Path>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            path: path.as_ref().to_owned(),
            writer: Mutex::new(None),
            frames_written: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    fn open(&self) -> Result<(), SinkError> {
        let file = File::create(&self.path)
            .map_err(|source| SinkError::OpenFailed { path: self.path.display().to_string(), source })?;
        *self.writer.lock() = Some(BufWriter::new(file));
        Ok(())
    }
}

impl Sink for RawDumper {
    fn id(&self) -> NodeId {
        self.id
    }

    fn start(&self) -> bool {
        if self.writer.lock().is_some() {
            return true;
        }
        match self.open() {
            Ok(()) => true,
            Err(e) => {
                warn!("raw dumper: {e}");
                false
            }
        }
    }

    fn stop(&self) {
        if let Some(mut writer) = self.writer.lock().take() {
            if let Err(e) = writer.flush() {
                warn!("raw dumper: final flush failed: {e}");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.writer.lock().is_some()
    }

    fn on_frame(&self, frame: Arc<Frame>) {
        if !frame.is_valid() {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match writer.write_all(&frame.bytes) {
            Ok(()) => {
                self.frames_written.fetch_add(1, Ordering::Relaxed);
                self.bytes_written.fetch_add(frame.bytes.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("raw dumper: write failed: {e}");
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rd_core::{PixelFormat, VideoMeta};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rd-sinks-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn writes_frame_bytes_verbatim_and_tracks_stats() {
        let path = temp_path("raw-basic.bin");
        let dumper = RawDumper::new(&path);
        assert!(dumper.start());

        let frame = Frame::new_video(
            Bytes::from(vec![0xABu8; 64]),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 4, height: 4, framerate: 30, is_keyframe: false, stride: None },
        );
        dumper.on_frame(frame);
        dumper.stop();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 64);
        assert!(written.iter().all(|&b| b == 0xAB));
        assert_eq!(dumper.stats().frames_written, 1);
        assert_eq!(dumper.stats().bytes_written, 64);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn on_frame_before_start_is_dropped() {
        let path = temp_path("raw-not-started.bin");
        let dumper = RawDumper::new(&path);
        let frame = Frame::new_video(
            Bytes::from(vec![1u8; 16]),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 2, height: 2, framerate: 30, is_keyframe: false, stride: None },
        );
        dumper.on_frame(frame);
        assert_eq!(dumper.stats().frames_dropped, 1);
    }

    #[test]
    fn invalid_frame_is_dropped() {
        let path = temp_path("raw-invalid.bin");
        let dumper = RawDumper::new(&path);
        assert!(dumper.start());
        let frame = Frame::new_video(
            Bytes::new(),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 2, height: 2, framerate: 30, is_keyframe: false, stride: None },
        );
        dumper.on_frame(frame);
        dumper.stop();
        assert_eq!(dumper.stats().frames_dropped, 1);
        let _ = std::fs::remove_file(&path);
    }
}
