//! Separable triangle convolution used for channel smoothing and gradient
//! normalization.
//!
//! The 1-D kernel for an integer radius `r >= 1` is
//! `[1, 2, ..., r, r+1, r, ..., 2, 1] / (r+1)^2`; for `0 < r <= 1` the
//! three-tap kernel `[1, p, 1] / (2 + p)` with `p = 12/r/(r+2) - 2` is used
//! instead, which reduces to `[1, 2, 1] / 4` at `r = 1`. Borders are handled
//! as if the image were padded symmetrically (edge sample repeated).
use crate::image::{ImageF32, ImageView, PlanarImage};

/// Build the normalized 1-D triangle taps for `radius`.
pub fn triangle_taps(radius: f64) -> Vec<f32> {
    assert!(radius > 0.0, "triangle radius must be positive");
    if radius <= 1.0 {
        let p = 12.0 / radius / (radius + 2.0) - 2.0;
        let norm = 1.0 / (2.0 + p);
        return vec![norm as f32, (p * norm) as f32, norm as f32];
    }
    let r = radius.round() as usize;
    let denom = ((r + 1) * (r + 1)) as f32;
    let mut taps = Vec::with_capacity(2 * r + 1);
    for i in 1..=r {
        taps.push(i as f32 / denom);
    }
    taps.push((r + 1) as f32 / denom);
    for i in (1..=r).rev() {
        taps.push(i as f32 / denom);
    }
    taps
}

#[inline]
fn mirror(i: isize, n: usize) -> usize {
    let n = n as isize;
    let mut i = i;
    // Symmetric padding with edge repetition; loop converges for any radius.
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

fn conv_axis_rows(src: &ImageF32, taps: &[f32], out: &mut ImageF32) {
    let r = taps.len() / 2;
    for y in 0..src.h {
        let row = src.row(y);
        for x in 0..src.w {
            let mut acc = 0.0f32;
            for (k, &t) in taps.iter().enumerate() {
                let sx = mirror(x as isize + k as isize - r as isize, src.w);
                acc += row[sx] * t;
            }
            out.set(x, y, acc);
        }
    }
}

fn conv_axis_cols(src: &ImageF32, taps: &[f32], out: &mut ImageF32) {
    let r = taps.len() / 2;
    for y in 0..src.h {
        for x in 0..src.w {
            let mut acc = 0.0f32;
            for (k, &t) in taps.iter().enumerate() {
                let sy = mirror(y as isize + k as isize - r as isize, src.h);
                acc += src.get(x, sy) * t;
            }
            out.set(x, y, acc);
        }
    }
}

/// Smooth a single plane with the triangle filter of the given radius.
///
/// `radius == 0` returns the input unchanged.
pub fn conv_tri(src: &ImageF32, radius: f64) -> ImageF32 {
    if radius == 0.0 || src.w == 0 || src.h == 0 {
        return src.clone();
    }
    let taps = triangle_taps(radius);
    let mut tmp = ImageF32::new(src.w, src.h);
    conv_axis_rows(src, &taps, &mut tmp);
    let mut out = ImageF32::new(src.w, src.h);
    conv_axis_cols(&tmp, &taps, &mut out);
    out
}

/// Smooth then decimate by an integer `step`, sampling at `floor(step/2)`
/// offsets so the output matches smoothing followed by strided slicing.
pub fn conv_tri_down(src: &ImageF32, radius: f64, step: usize) -> ImageF32 {
    let smoothed = conv_tri(src, radius);
    if step <= 1 {
        return smoothed;
    }
    let t = step / 2;
    let nw = src.w.div_ceil(step);
    let nh = src.h.div_ceil(step);
    let mut out = ImageF32::new(nw, nh);
    for y in 0..nh {
        let sy = (y * step + t).min(src.h - 1);
        for x in 0..nw {
            let sx = (x * step + t).min(src.w - 1);
            out.set(x, y, smoothed.get(sx, sy));
        }
    }
    out
}

/// Smooth every plane of a stack in place.
pub fn conv_tri_planar(stack: &mut PlanarImage<f32>, radius: f64) {
    if radius == 0.0 {
        return;
    }
    for p in 0..stack.n_planes {
        let plane = stack.plane_image(p);
        let smoothed = conv_tri(&plane, radius);
        stack.plane_mut(p).copy_from_slice(&smoothed.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taps_sum_to_one() {
        for r in [0.5, 1.0, 2.0, 5.0] {
            let sum: f32 = triangle_taps(r).iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "radius {r}: sum {sum}");
        }
    }

    #[test]
    fn radius_one_is_binomial() {
        let taps = triangle_taps(1.0);
        assert_eq!(taps.len(), 3);
        assert!((taps[0] - 0.25).abs() < 1e-6);
        assert!((taps[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn constant_image_unchanged() {
        let img = ImageF32::from_vec(8, 6, vec![0.7; 48]);
        let out = conv_tri(&img, 5.0);
        for &v in &out.data {
            assert!((v - 0.7).abs() < 1e-5);
        }
    }

    #[test]
    fn impulse_spreads_triangle() {
        let mut img = ImageF32::new(9, 9);
        img.set(4, 4, 1.0);
        let out = conv_tri(&img, 1.0);
        assert!((out.get(4, 4) - 0.25).abs() < 1e-6);
        assert!((out.get(3, 4) - 0.125).abs() < 1e-6);
        assert!((out.get(3, 3) - 0.0625).abs() < 1e-6);
    }

    #[test]
    fn downsample_shape() {
        let img = ImageF32::new(10, 7);
        let out = conv_tri_down(&img, 1.0, 2);
        assert_eq!((out.w, out.h), (5, 4));
    }
}
