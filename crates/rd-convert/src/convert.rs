//! Single-pass pixel-format conversion arithmetic.
//!
//! Channel reorders within 24-/32-bit packed formats are straight byte
//! permutations; RGB/BGR → I420 uses the well-known BT.601 integer
//! coefficients with a rounding bias before each right-shift (plain
//! truncation undercounts `Y` by one for a pure-blue input).

use bytes::Bytes;

use rd_core::{PixelFormat, VideoMeta};

/// Returns `(output_bytes, output_video_meta)`, or `None` if the conversion
/// is unsupported or the input is malformed for the requested output (e.g.
/// odd dimensions targeting I420).
pub(crate) fn convert(
    input_format: PixelFormat,
    output_format: PixelFormat,
    bytes: &[u8],
    meta: VideoMeta,
) -> Option<(Bytes, VideoMeta)> {
    let w = meta.width as usize;
    let h = meta.height as usize;

    if output_format == PixelFormat::I420 {
        if w % 2 != 0 || h % 2 != 0 {
            return None;
        }
        let out = rgb_like_to_i420(input_format, bytes, w, h)?;
        let out_meta = VideoMeta { stride: None, ..meta };
        return Some((Bytes::from(out), out_meta));
    }

    if output_format.bytes_per_pixel().is_some() {
        let out = packed_to_packed(input_format, output_format, bytes, w, h)?;
        let bpp = output_format.bytes_per_pixel().unwrap();
        let out_meta = VideoMeta { stride: Some(w as u32 * bpp), ..meta };
        return Some((Bytes::from(out), out_meta));
    }

    None
}

/// Byte offsets of (R, G, B) within one packed pixel, and whether the format
/// carries an alpha channel as the fourth byte.
fn channel_layout(format: PixelFormat) -> Option<(usize, usize, usize, bool)> {
    match format {
        PixelFormat::Rgb24 => Some((0, 1, 2, false)),
        PixelFormat::Bgr24 => Some((2, 1, 0, false)),
        PixelFormat::Rgba32 => Some((0, 1, 2, true)),
        PixelFormat::Bgra32 => Some((2, 1, 0, true)),
        _ => None,
    }
}

fn read_rgb(format: PixelFormat, px: &[u8]) -> Option<(u8, u8, u8, u8)> {
    let (ri, gi, bi, has_alpha) = channel_layout(format)?;
    let alpha = if has_alpha { px[3] } else { 255 };
    Some((px[ri], px[gi], px[bi], alpha))
}

fn write_rgb(format: PixelFormat, out: &mut [u8], r: u8, g: u8, b: u8, a: u8) -> Option<()> {
    let (ri, gi, bi, has_alpha) = channel_layout(format)?;
    out[ri] = r;
    out[gi] = g;
    out[bi] = b;
    if has_alpha {
        out[3] = a;
    }
    Some(())
}

fn packed_to_packed(
    input_format: PixelFormat,
    output_format: PixelFormat,
    bytes: &[u8],
    w: usize,
    h: usize,
) -> Option<Vec<u8>> {
    let in_bpp = input_format.bytes_per_pixel()? as usize;
    let out_bpp = output_format.bytes_per_pixel()? as usize;
    let pixel_count = w * h;
    if bytes.len() < pixel_count * in_bpp {
        return None;
    }

    let mut out = vec![0u8; pixel_count * out_bpp];
    for i in 0..pixel_count {
        let src = &bytes[i * in_bpp..i * in_bpp + in_bpp];
        let (r, g, b, a) = read_rgb(input_format, src)?;
        let dst = &mut out[i * out_bpp..i * out_bpp + out_bpp];
        write_rgb(output_format, dst, r, g, b, a)?;
    }
    Some(out)
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 full-range integer coefficients with a `+128` rounding bias before
/// each arithmetic right-shift.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = (77 * r + 150 * g + 29 * b + 128) >> 8;
    let u = ((-43 * r - 85 * g + 128 * b + 128) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b + 128) >> 8) + 128;
    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

/// RGB/BGR (24- or 32-bit) → I420. U/V are subsampled by taking the sample
/// at even `(x, y)` only, rather than averaging each 2x2 block.
fn rgb_like_to_i420(input_format: PixelFormat, bytes: &[u8], w: usize, h: usize) -> Option<Vec<u8>> {
    let in_bpp = input_format.bytes_per_pixel()? as usize;
    if bytes.len() < w * h * in_bpp {
        return None;
    }

    let chroma_w = w / 2;
    let chroma_h = h / 2;
    let mut out = vec![0u8; w * h + 2 * chroma_w * chroma_h];

    let (y_plane, uv) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = uv.split_at_mut(chroma_w * chroma_h);

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let px = &bytes[idx * in_bpp..idx * in_bpp + in_bpp];
            let (r, g, b, _a) = read_rgb(input_format, px)?;
            let (yy, _u, _v) = rgb_to_yuv(r, g, b);
            y_plane[idx] = yy;
        }
    }

    for cy in 0..chroma_h {
        for cx in 0..chroma_w {
            let (x, y) = (cx * 2, cy * 2);
            let idx = y * w + x;
            let px = &bytes[idx * in_bpp..idx * in_bpp + in_bpp];
            let (r, g, b, _a) = read_rgb(input_format, px)?;
            let (_y, u, v) = rgb_to_yuv(r, g, b);
            u_plane[cy * chroma_w + cx] = u;
            v_plane[cy * chroma_w + cx] = v;
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_to_bgr_swaps_channels() {
        let bytes = [10u8, 20, 30];
        let out = packed_to_packed(PixelFormat::Rgb24, PixelFormat::Bgr24, &bytes, 1, 1).unwrap();
        assert_eq!(out, vec![30, 20, 10]);
    }

    #[test]
    fn rgb24_to_rgba32_sets_alpha_opaque() {
        let bytes = [10u8, 20, 30];
        let out = packed_to_packed(PixelFormat::Rgb24, PixelFormat::Rgba32, &bytes, 1, 1).unwrap();
        assert_eq!(out, vec![10, 20, 30, 255]);
    }

    #[test]
    fn bt601_solid_blue_matches_worked_example() {
        // B=255,G=0,R=0
        let (y, u, v) = rgb_to_yuv(0, 0, 255);
        assert_eq!((y, u, v), (29, 255, 107));
    }

    #[test]
    fn i420_output_size_matches_formula() {
        let bytes = vec![255u8, 0, 0, 255].repeat(8); // 4x2 bgra32
        let out = rgb_like_to_i420(PixelFormat::Bgra32, &bytes, 4, 2).unwrap();
        assert_eq!(out.len(), 4 * 2 + 2 * 2 * 1);
    }
}
