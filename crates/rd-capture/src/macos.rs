//! CoreGraphics (macOS) capture backend — reserved, not implemented in this
//! MVP.

use std::sync::Arc;

use crate::{CaptureEngine, UnsupportedEngine};

pub(crate) fn engine() -> Option<Arc<dyn CaptureEngine>> {
    Some(UnsupportedEngine::new("CoreGraphics"))
}
