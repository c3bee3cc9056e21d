//! Configuration structs shared across the pipeline.

use serde::{Deserialize, Serialize};

use crate::frame::PixelFormat;

/// Resampling algorithm for the video scaler. Only [`ScaleAlgorithm::Bilinear`]
/// is implemented; the others are accepted in config but currently fall back
/// to bilinear rather than being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleAlgorithm {
    Nearest,
    Bilinear,
    Bicubic,
    Lanczos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub frame_rate: u32,
    /// 0 = full monitor.
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub monitor_index: usize,
    pub capture_cursor: bool,
    pub use_hardware_acceleration: bool,
    pub pixel_format_hint: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            width: 0,
            height: 0,
            offset_x: 0,
            offset_y: 0,
            monitor_index: 0,
            capture_cursor: false,
            use_hardware_acceleration: true,
            pixel_format_hint: "BGRA".to_owned(),
        }
    }
}

impl CaptureConfig {
    pub fn is_valid(&self) -> bool {
        self.frame_rate >= 1
    }

    pub fn frame_interval_ms(&self) -> u64 {
        1000 / self.frame_rate.max(1) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub target_width: u32,
    pub target_height: u32,
    pub algorithm: ScaleAlgorithm,
    pub maintain_aspect_ratio: bool,
    pub enable_threading: bool,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            target_width: 1280,
            target_height: 720,
            algorithm: ScaleAlgorithm::Bilinear,
            maintain_aspect_ratio: true,
            enable_threading: false,
        }
    }
}

impl ScalerConfig {
    pub fn is_valid(&self) -> bool {
        self.target_width > 0 && self.target_height > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub input_format: PixelFormat,
    pub output_format: PixelFormat,
    pub enable_threading: bool,
}

impl Serialize for PixelFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u16(*self as u16)
    }
}

impl<'de> Deserialize<'de> for PixelFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = u16::deserialize(deserializer)?;
        PixelFormat::from_code(code).ok_or_else(|| serde::de::Error::custom("unknown pixel format code"))
    }
}

impl PixelFormat {
    pub fn from_code(code: u16) -> Option<Self> {
        use PixelFormat::*;
        Some(match code {
            0 => Unknown,
            100 => I420,
            101 => Nv12,
            102 => Rgb24,
            103 => Bgr24,
            104 => Rgba32,
            105 => Bgra32,
            106 => H264,
            107 => H265,
            108 => Vp8,
            109 => Vp9,
            200 => PcmS16Le,
            201 => PcmF32Le,
            202 => Aac,
            203 => Mp3,
            204 => Opus,
            205 => G711Pcmu,
            206 => G711Pcma,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub keyframe_interval: u32,
    pub input_format: PixelFormat,
    pub output_format: PixelFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    #[serde(rename = "type")]
    pub app_type: String,
    pub advertised_port: u16,
    pub version: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { app_type: "remote-desk".to_owned(), advertised_port: 0, version: "0.1.0".to_owned() }
    }
}

pub const DISCOVERY_BROADCAST_ADDR: &str = "255.255.255.255";
pub const DISCOVERY_PORT: u16 = 19000;
pub const DISCOVERY_INTERVAL_MS: u64 = 1000;
pub const DISCOVERY_POLL_MS: u64 = 100;
