//! Immutable-after-publish frame buffer shared across the node graph.

use std::sync::Arc;

use bytes::Bytes;

// MARK: - PixelFormat

/// Frame payload format. Numeric codes partition into Video (100-199) and
/// Audio (200-299) so [`PixelFormat::is_video`]/[`PixelFormat::is_audio`] can
/// derive from the hundreds digit alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PixelFormat {
    Unknown = 0,

    I420 = 100,
    Nv12 = 101,
    Rgb24 = 102,
    Bgr24 = 103,
    Rgba32 = 104,
    Bgra32 = 105,
    H264 = 106,
    H265 = 107,
    Vp8 = 108,
    Vp9 = 109,

    PcmS16Le = 200,
    PcmF32Le = 201,
    Aac = 202,
    Mp3 = 203,
    Opus = 204,
    G711Pcmu = 205,
    G711Pcma = 206,
}

impl PixelFormat {
    pub fn is_video(self) -> bool {
        (self as u16) / 100 == 1
    }

    pub fn is_audio(self) -> bool {
        (self as u16) / 100 == 2
    }

    /// Bytes per pixel for packed RGB/RGBA formats. `None` for planar or
    /// compressed formats, which carry their own size formula.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => Some(4),
            _ => None,
        }
    }
}

// MARK: - Frame

/// Video-only metadata carried by a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub is_keyframe: bool,
    /// Bytes per row; may exceed `width * bytes_per_pixel` for padded layouts.
    pub stride: Option<u32>,
}

/// Audio-only metadata carried by a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMeta {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples_per_frame: u32,
    pub bytes_per_sample: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameMeta {
    Video(VideoMeta),
    Audio(AudioMeta),
    None,
}

/// Reference-counted, immutable-after-publish buffer of pixel or sample bytes.
///
/// A producer must not mutate a frame after it has been handed to
/// [`crate::node::Source::deliver`] — every sink downstream sees the same
/// bytes. Cloning a `Frame` is `Arc` bookkeeping only, never a copy.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Bytes,
    pub format: PixelFormat,
    pub timestamp: i64,
    pub meta: FrameMeta,
}

impl Frame {
    pub fn new_video(bytes: Bytes, format: PixelFormat, timestamp: i64, meta: VideoMeta) -> Arc<Self> {
        Arc::new(Self { bytes, format, timestamp, meta: FrameMeta::Video(meta) })
    }

    pub fn new_audio(bytes: Bytes, format: PixelFormat, timestamp: i64, meta: AudioMeta) -> Arc<Self> {
        Arc::new(Self { bytes, format, timestamp, meta: FrameMeta::Audio(meta) })
    }

    pub fn video_meta(&self) -> Option<VideoMeta> {
        match self.meta {
            FrameMeta::Video(m) => Some(m),
            _ => None,
        }
    }

    pub fn audio_meta(&self) -> Option<AudioMeta> {
        match self.meta {
            FrameMeta::Audio(m) => Some(m),
            _ => None,
        }
    }

    pub fn width(&self) -> Option<u32> {
        self.video_meta().map(|m| m.width)
    }

    pub fn height(&self) -> Option<u32> {
        self.video_meta().map(|m| m.height)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// `IsValid ⇔ bytes ≠ ∅ ∧ size > 0`. For video, additionally requires
    /// `size ≥ height·stride` (or `≥ width·height·bytes_per_pixel` when no
    /// stride is set).
    pub fn is_valid(&self) -> bool {
        if self.bytes.is_empty() {
            return false;
        }
        if let Some(vm) = self.video_meta() {
            let min_size = match vm.stride {
                Some(stride) => vm.height as usize * stride as usize,
                None => match self.format.bytes_per_pixel() {
                    Some(bpp) => vm.width as usize * vm.height as usize * bpp as usize,
                    None => 0,
                },
            };
            return self.bytes.len() >= min_size;
        }
        true
    }

    /// Build a derived frame sharing the same video metadata but new bytes —
    /// used by processors that transform payload without changing dimensions.
    pub fn with_bytes(&self, bytes: Bytes) -> Arc<Self> {
        Arc::new(Self { bytes, format: self.format, timestamp: self.timestamp, meta: self.meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_bgra(w: u32, h: u32, fill: u8) -> Arc<Frame> {
        let bytes = Bytes::from(vec![fill; (w * h * 4) as usize]);
        Frame::new_video(
            bytes,
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: w, height: h, framerate: 30, is_keyframe: false, stride: None },
        )
    }

    #[test]
    fn valid_frame_has_bytes_and_positive_size() {
        let f = solid_bgra(4, 2, 0x7F);
        assert!(f.is_valid());
        assert_eq!(f.size(), 32);
    }

    #[test]
    fn empty_bytes_is_invalid() {
        let f = Frame::new_video(
            Bytes::new(),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 4, height: 2, framerate: 30, is_keyframe: false, stride: None },
        );
        assert!(!f.is_valid());
    }

    #[test]
    fn undersized_buffer_is_invalid() {
        let f = Frame::new_video(
            Bytes::from(vec![0u8; 4]),
            PixelFormat::Bgra32,
            0,
            VideoMeta { width: 4, height: 2, framerate: 30, is_keyframe: false, stride: None },
        );
        assert!(!f.is_valid());
    }

    #[test]
    fn format_partitions_by_hundreds_digit() {
        assert!(PixelFormat::Bgra32.is_video());
        assert!(!PixelFormat::Bgra32.is_audio());
        assert!(PixelFormat::Opus.is_audio());
        assert!(!PixelFormat::Opus.is_video());
    }
}
