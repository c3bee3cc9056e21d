//! X11 screen capture via `XGetImage`-equivalent RandR/core-protocol calls.

use std::sync::Arc;

use rd_core::{CaptureConfig, CaptureError, CaptureResult, ScreenInfo};

use crate::{CaptureEngine, UnsupportedEngine};

#[cfg(target_os = "linux")]
pub(crate) fn engine() -> Option<Arc<dyn CaptureEngine>> {
    Some(linux::X11Engine::new())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn engine() -> Option<Arc<dyn CaptureEngine>> {
    Some(UnsupportedEngine::new("X11"))
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    use bytes::Bytes;
    use parking_lot::{Mutex, RwLock};
    use tracing::warn;
    use x11rb::connection::Connection;
    use x11rb::protocol::randr::ConnectionExt as RandrExt;
    use x11rb::protocol::xproto::{ConnectionExt as XprotoExt, ImageFormat, Screen};
    use x11rb::rust_connection::RustConnection;

    use rd_core::{Frame, VideoMeta};

    use crate::worker::WorkerHandle;
    use crate::FrameCallback;

    pub(crate) struct X11Engine {
        config: RwLock<Option<CaptureConfig>>,
        callback: Arc<RwLock<Option<FrameCallback>>>,
        worker: Mutex<Option<WorkerHandle>>,
    }

    impl X11Engine {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                config: RwLock::new(None),
                callback: Arc::new(RwLock::new(None)),
                worker: Mutex::new(None),
            })
        }
    }

    impl CaptureEngine for X11Engine {
        fn initialize(&self, config: CaptureConfig) -> CaptureResult {
            if self.worker.lock().is_some() {
                return Err(CaptureError::AlreadyStarted);
            }
            if !config.is_valid() {
                return Err(CaptureError::InvalidConfig);
            }
            if std::env::var_os("DISPLAY").is_none() {
                return Err(CaptureError::NoDisplay);
            }
            // Probe the display once up front so `initialize` fails loudly
            // in headless environments instead of waiting for the first
            // worker tick.
            if x11rb::connect(None).is_err() {
                return Err(CaptureError::NoDisplay);
            }
            *self.config.write() = Some(config);
            Ok(())
        }

        fn start(&self) -> CaptureResult {
            let mut worker_guard = self.worker.lock();
            if worker_guard.is_some() {
                return Ok(());
            }
            let config = self.config.read().clone().ok_or(CaptureError::InvalidConfig)?;
            let callback = self.callback.clone();
            let frame_rate = config.frame_rate;

            let mut conn_state: Option<X11Conn> = None;
            *worker_guard = Some(WorkerHandle::spawn(frame_rate, move || {
                capture_tick(&mut conn_state, &config, &callback)
            }));
            Ok(())
        }

        fn stop(&self) {
            if let Some(mut worker) = self.worker.lock().take() {
                worker.stop();
            }
        }

        fn is_running(&self) -> bool {
            self.worker.lock().as_ref().map(WorkerHandle::is_running).unwrap_or(false)
        }

        fn available_screens(&self) -> Vec<ScreenInfo> {
            enumerate_screens().unwrap_or_default()
        }

        fn set_frame_callback(&self, callback: FrameCallback) {
            *self.callback.write() = Some(callback);
        }

        fn update_config(&self, config: CaptureConfig) -> CaptureResult {
            let was_running = self.is_running();
            self.stop();
            *self.config.write() = None;
            self.initialize(config)?;
            if was_running {
                self.start()?;
            }
            Ok(())
        }
    }

    fn capture_tick(
        conn_state: &mut Option<X11Conn>,
        config: &CaptureConfig,
        callback: &Arc<RwLock<Option<FrameCallback>>>,
    ) -> bool {
        if conn_state.is_none() {
            match X11Conn::open(config) {
                Ok(conn) => *conn_state = Some(conn),
                Err(e) => {
                    warn!("x11 capture: failed to open display: {e}");
                    return false;
                }
            }
        }

        let conn = conn_state.as_mut().expect("just populated");
        match conn.capture_frame(config) {
            Ok(frame) => {
                if let Some(cb) = callback.read().as_ref() {
                    cb(frame);
                }
                true
            }
            Err(e) => {
                warn!("x11 capture: frame capture failed, will reconnect: {e}");
                *conn_state = None;
                false
            }
        }
    }

    struct X11Conn {
        conn: RustConnection,
        root: u32,
        rect: (i16, i16, u16, u16),
        format: rd_core::PixelFormat,
    }

    impl X11Conn {
        fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
            let (conn, screen_num) = x11rb::connect(None).map_err(|_| CaptureError::NoDisplay)?;
            let root;
            let format;
            let rect;
            {
                let screen = &conn.setup().roots[screen_num];
                root = screen.root;
                format = detect_format(screen).unwrap_or(rd_core::PixelFormat::Bgra32);

                let (full_w, full_h) = (screen.width_in_pixels, screen.height_in_pixels);
                rect = if config.width > 0 && config.height > 0 {
                    (config.offset_x as i16, config.offset_y as i16, config.width as u16, config.height as u16)
                } else {
                    (0i16, 0i16, full_w, full_h)
                };
            }
            Ok(Self { conn, root, rect, format })
        }

        fn capture_frame(&self, config: &CaptureConfig) -> Result<Arc<Frame>, CaptureError> {
            let (x, y, w, h) = self.rect;
            let reply = self
                .conn
                .get_image(ImageFormat::Z_PIXMAP, self.root, x, y, w, h, !0)
                .map_err(|_| CaptureError::AccessDenied)?
                .reply()
                .map_err(|_| CaptureError::AccessDenied)?;

            let stride = w as usize * 4;
            let data = reply.data;
            if data.len() < h as usize * stride {
                return Err(CaptureError::Unknown);
            }

            let frame = Frame::new_video(
                Bytes::from(data),
                self.format,
                rd_core::clock::now_micros(),
                VideoMeta {
                    width: w as u32,
                    height: h as u32,
                    framerate: config.frame_rate,
                    is_keyframe: false,
                    stride: Some(stride as u32),
                },
            );
            Ok(frame)
        }
    }

    /// `0x00FF0000/0x0000FF00/0x000000FF` → BGRA32, reversed → RGBA32, else
    /// `None` (caller falls back to BGRA32).
    fn detect_format(screen: &Screen) -> Option<rd_core::PixelFormat> {
        let depth_info = screen.allowed_depths.iter().find(|d| d.depth == 24 || d.depth == 32)?;
        let visual = depth_info.visuals.iter().find(|v| v.visual_id == screen.root_visual)?;
        match (visual.red_mask, visual.green_mask, visual.blue_mask) {
            (0x00FF_0000, 0x0000_FF00, 0x0000_00FF) => Some(rd_core::PixelFormat::Bgra32),
            (0x0000_00FF, 0x0000_FF00, 0x00FF_0000) => Some(rd_core::PixelFormat::Rgba32),
            _ => None,
        }
    }

    fn enumerate_screens() -> Result<Vec<ScreenInfo>, CaptureError> {
        let (conn, screen_num) = x11rb::connect(None).map_err(|_| CaptureError::NoDisplay)?;
        let root = conn.setup().roots[screen_num].root;

        let resources = conn
            .randr_get_screen_resources_current(root)
            .map_err(|_| CaptureError::Unknown)?
            .reply()
            .map_err(|_| CaptureError::Unknown)?;

        let mut screens = Vec::new();
        for (idx, output) in resources.outputs.iter().enumerate() {
            let info = match conn.randr_get_output_info(*output, 0).and_then(|c| c.reply()) {
                Ok(info) => info,
                Err(_) => continue,
            };
            if info.crtc == 0 {
                continue;
            }
            let crtc = match conn.randr_get_crtc_info(info.crtc, 0).and_then(|c| c.reply()) {
                Ok(crtc) => crtc,
                Err(_) => continue,
            };
            screens.push(ScreenInfo {
                id: idx as u32,
                width: crtc.width as u32,
                height: crtc.height as u32,
                bits_per_pixel: 32,
                x: crtc.x as i32,
                y: crtc.y as i32,
                name: String::from_utf8_lossy(&info.name).into_owned(),
                is_primary: idx == 0,
            });
        }
        Ok(screens)
    }
}
