//! Writes I420 frames as a YUV4MPEG2 (`.y4m`) stream: one stream header
//! (`YUV4MPEG2 W{w} H{h} F{fps}:1 Ip A1:1 C420jpeg`) followed by one
//! `FRAME` line plus the Y/U/V planes per frame, matching the planar
//! Y-then-U-then-V layout the converter produces.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use rd_core::{Frame, NodeId, PixelFormat, Sink};

use crate::{SinkError, SinkStats};

struct Session {
    writer: BufWriter<File>,
    header_written: bool,
}

pub struct Y4mWriter {
    id: NodeId,
    path: PathBuf,
    session: Mutex<Option<Session>>,
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_written: AtomicU64,
}

impl Y4mWriter {
    pub fn new(path: impl AsRef<Path>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            path: path.as_ref().to_owned(),
            session: Mutex::new(None),
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
        *self.session.lock() = Some(Session { writer: BufWriter::new(file), header_written: false });
        Ok(())
    }
}

impl Sink for Y4mWriter {
    fn id(&self) -> NodeId {
        self.id
    }

    fn start(&self) -> bool {
        if self.session.lock().is_some() {
            return true;
        }
        match self.open() {
            Ok(()) => true,
            Err(e) => {
                warn!("y4m writer: {e}");
                false
            }
        }
    }

    fn stop(&self) {
        if let Some(mut session) = self.session.lock().take() {
            if let Err(e) = session.writer.flush() {
                warn!("y4m writer: final flush failed: {e}");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    fn on_frame(&self, frame: Arc<Frame>) {
        if !frame.is_valid() || frame.format != PixelFormat::I420 {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Some(vm) = frame.video_meta() else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let mut session = self.session.lock();
        let Some(session) = session.as_mut() else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let write_result = (|| -> std::io::Result<usize> {
            let mut written = 0;
            if !session.header_written {
                let header = format!("YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C420jpeg\n", vm.width, vm.height, vm.framerate.max(1));
                session.writer.write_all(header.as_bytes())?;
                written += header.len();
                session.header_written = true;
            }
            session.writer.write_all(b"FRAME\n")?;
            written += 6;
            session.writer.write_all(&frame.bytes)?;
            written += frame.bytes.len();
            Ok(written)
        })();

        match write_result {
            Ok(n) => {
                self.frames_written.fetch_add(1, Ordering::Relaxed);
                self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("y4m writer: write failed: {e}");
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rd_core::VideoMeta;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rd-sinks-test-{}-{name}", std::process::id()))
    }

    fn i420_frame(w: u32, h: u32) -> Arc<Frame> {
        let size = (w * h + 2 * (w / 2) * (h / 2)) as usize;
        Frame::new_video(
            Bytes::from(vec![0x10u8; size]),
            PixelFormat::I420,
            0,
            VideoMeta { width: w, height: h, framerate: 30, is_keyframe: false, stride: None },
        )
    }

    #[test]
    fn header_written_once_then_one_frame_block_per_call() {
        let path = temp_path("y4m-basic.y4m");
        let writer = Y4mWriter::new(&path);
        assert!(writer.start());

        writer.on_frame(i420_frame(4, 2));
        writer.on_frame(i420_frame(4, 2));
        writer.stop();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("YUV4MPEG2 W4 H2 F30:1 Ip A1:1 C420jpeg\n"));
        assert_eq!(contents.matches("FRAME\n").count(), 2);
        assert_eq!(writer.stats().frames_written, 2);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn non_i420_frame_is_rejected() {
        let path = temp_path("y4m-wrong-format.y4m");
        let writer = Y4mWriter::new(&path);
        assert!(writer.start());

        let frame = Frame::new_video(
            Bytes::from(vec![0u8; 16]),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 2, height: 2, framerate: 30, is_keyframe: false, stride: None },
        );
        writer.on_frame(frame);
        writer.stop();
        assert_eq!(writer.stats().frames_dropped, 1);
        assert_eq!(writer.stats().frames_written, 0);

        let _ = std::fs::remove_file(&path);
    }
}
