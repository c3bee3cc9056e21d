//! rd-capture — platform screen-capture engines and the factory that selects
//! between them.
//!
//! A [`CaptureEngine`] is not itself a [`rd_core::Source`]: it emits frames
//! through an installed callback from its own worker thread. [`CaptureSource`]
//! is the thin adapter that forwards that callback into a [`rd_core::FanOut`]
//! so capture engines plug into the rest of the node graph the same way any
//! other producer does.

use std::sync::Arc;

use rd_core::{CaptureConfig, CaptureError, CaptureResult, Frame, NodeId, ScreenInfo, Source};

mod worker;
pub use worker::WorkerHandle;

mod dxgi;
mod macos;
mod wayland;
mod x11;

pub type FrameCallback = Box<dyn Fn(Arc<Frame>) + Send + Sync>;

/// Platform-agnostic screen-capture producer.
///
/// Implementations must be safe to call from any thread: `start`/`stop` run
/// on the caller's thread but spawn/join a dedicated capture worker.
pub trait CaptureEngine: Send + Sync {
    fn initialize(&self, config: CaptureConfig) -> CaptureResult;
    fn start(&self) -> CaptureResult;
    fn stop(&self);
    fn is_running(&self) -> bool;
    fn available_screens(&self) -> Vec<ScreenInfo>;
    fn set_frame_callback(&self, callback: FrameCallback);
    fn update_config(&self, config: CaptureConfig) -> CaptureResult;
}

/// Backend selection tag for [`create_engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technology {
    DesktopDuplication,
    X11,
    Wayland,
    CoreGraphics,
    Auto,
}

/// Resolves `Auto` to the best backend for the host, then constructs it.
/// Returns `None` when the requested (or resolved) backend isn't compiled
/// in for this platform.
pub fn create_engine(technology: Technology) -> Option<Arc<dyn CaptureEngine>> {
    let resolved = match technology {
        Technology::Auto => resolve_auto(),
        other => other,
    };

    match resolved {
        Technology::X11 => x11::engine(),
        Technology::DesktopDuplication => dxgi::engine(),
        Technology::Wayland => wayland::engine(),
        Technology::CoreGraphics => macos::engine(),
        Technology::Auto => unreachable!("resolve_auto never returns Auto"),
    }
}

#[cfg(target_os = "windows")]
fn resolve_auto() -> Technology {
    Technology::DesktopDuplication
}

#[cfg(target_os = "linux")]
fn resolve_auto() -> Technology {
    if std::env::var_os("DISPLAY").is_some() {
        Technology::X11
    } else {
        tracing::warn!("no DISPLAY set; Wayland capture isn't implemented, attempting X11 via XWayland anyway");
        Technology::X11
    }
}

#[cfg(target_os = "macos")]
fn resolve_auto() -> Technology {
    Technology::CoreGraphics
}

#[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
fn resolve_auto() -> Technology {
    Technology::X11
}

/// Adapts a [`CaptureEngine`]'s single frame callback into the generic
/// [`Source`] fan-out used by the rest of the pipeline.
pub struct CaptureSource {
    id: NodeId,
    fan_out: Arc<rd_core::FanOut>,
    engine: Arc<dyn CaptureEngine>,
}

impl CaptureSource {
    pub fn new(engine: Arc<dyn CaptureEngine>) -> Arc<Self> {
        let fan_out = Arc::new(rd_core::FanOut::new());
        let fan_out_for_callback = fan_out.clone();
        engine.set_frame_callback(Box::new(move |frame| fan_out_for_callback.deliver(frame)));
        Arc::new(Self { id: NodeId::next(), fan_out, engine })
    }

    pub fn engine(&self) -> &Arc<dyn CaptureEngine> {
        &self.engine
    }
}

impl Source for CaptureSource {
    fn id(&self) -> NodeId {
        self.id
    }
    fn fan_out(&self) -> &rd_core::FanOut {
        &self.fan_out
    }
}

/// A stub `CaptureEngine` used by backends not yet implemented on a given
/// platform. Every operation reports [`CaptureError::NotSupported`].
pub(crate) struct UnsupportedEngine {
    label: &'static str,
}

impl UnsupportedEngine {
    pub(crate) fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self { label })
    }
}

impl CaptureEngine for UnsupportedEngine {
    fn initialize(&self, _config: CaptureConfig) -> CaptureResult {
        tracing::warn!("{} capture backend is not implemented on this platform", self.label);
        Err(CaptureError::NotSupported)
    }
    fn start(&self) -> CaptureResult {
        Err(CaptureError::NotSupported)
    }
    fn stop(&self) {}
    fn is_running(&self) -> bool {
        false
    }
    fn available_screens(&self) -> Vec<ScreenInfo> {
        Vec::new()
    }
    fn set_frame_callback(&self, _callback: FrameCallback) {}
    fn update_config(&self, _config: CaptureConfig) -> CaptureResult {
        Err(CaptureError::NotSupported)
    }
}
