//! Bilinear resampling for packed video frames.

/// Resize one packed frame with `channels` bytes per pixel (4 for
/// BGRA32/RGBA32). Each channel is interpolated independently — channel
/// *semantics* don't matter to the arithmetic, only that all formats we're
/// asked to scale are packed with a fixed stride per pixel.
pub(crate) fn bilinear_resize(
    src: &[u8],
    in_w: usize,
    in_h: usize,
    out_w: usize,
    out_h: usize,
    channels: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; out_w * out_h * channels];

    for y in 0..out_h {
        let sy = y as f64 * in_h as f64 / out_h as f64;
        let sy0 = (sy.floor() as usize).min(in_h - 1);
        let sy1 = (sy0 + 1).min(in_h - 1);
        let dy = sy - sy0 as f64;

        for x in 0..out_w {
            let sx = x as f64 * in_w as f64 / out_w as f64;
            let sx0 = (sx.floor() as usize).min(in_w - 1);
            let sx1 = (sx0 + 1).min(in_w - 1);
            let dx = sx - sx0 as f64;

            for c in 0..channels {
                let p00 = src[(sy0 * in_w + sx0) * channels + c] as f64;
                let p10 = src[(sy0 * in_w + sx1) * channels + c] as f64;
                let p01 = src[(sy1 * in_w + sx0) * channels + c] as f64;
                let p11 = src[(sy1 * in_w + sx1) * channels + c] as f64;

                let top = p00 * (1.0 - dx) + p10 * dx;
                let bot = p01 * (1.0 - dx) + p11 * dx;
                let value = top * (1.0 - dy) + bot * dy;

                out[(y * out_w + x) * channels + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Fit `(in_w, in_h)` within `(target_w, target_h)` preserving aspect ratio,
/// then round each dimension up to the nearest even number.
///
/// The binding dimension (the one the aspect ratio pins to the target) is
/// assigned directly from `target_w`/`target_h` rather than recomputed via
/// `in * (target / in)`, which can overshoot past the target by a fraction of
/// a pixel from float error and then round up past it — violating `W' ≤ T`.
pub(crate) fn fit_preserving_aspect(in_w: u32, in_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let scale_w = target_w as f64 / in_w as f64;
    let scale_h = target_h as f64 / in_h as f64;

    let (tw, th) = if scale_w <= scale_h {
        (target_w, (in_h as f64 * scale_w).ceil() as u32)
    } else {
        ((in_w as f64 * scale_h).ceil() as u32, target_h)
    };

    (round_up_even(tw.max(2)).min(round_up_even(target_w)), round_up_even(th.max(2)).min(round_up_even(target_h)))
}

fn round_up_even(x: u32) -> u32 {
    if x % 2 == 0 {
        x
    } else {
        x + 1
    }
}
