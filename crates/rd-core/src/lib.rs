//! rd-core — frame types, node-graph capabilities, and the pipeline
//! assembler shared by every other crate in this workspace.

pub mod clock;
pub mod config;
pub mod errors;
pub mod frame;
pub mod node;
pub mod pipeline;
pub mod types;

pub use config::{
    CaptureConfig, ConverterConfig, DiscoveryConfig, EncoderConfig, ScaleAlgorithm, ScalerConfig,
    DISCOVERY_BROADCAST_ADDR, DISCOVERY_INTERVAL_MS, DISCOVERY_PORT, DISCOVERY_POLL_MS,
};
pub use errors::{CaptureError, CaptureResult, DiscoveryError, ServiceError};
pub use frame::{AudioMeta, Frame, FrameMeta, PixelFormat, VideoMeta};
pub use node::{FanOut, NodeId, Processor, Sink, Source};
pub use pipeline::Pipeline;
pub use types::{DiscoveryInfo, ScreenInfo};
