//! Separable image resampling with an optional scalar gain.
//!
//! Downscaling integrates over the source footprint of every output sample
//! (area averaging), which keeps channel means stable across scales; upscaling
//! interpolates bilinearly. The gain multiplies every output sample and is
//! what the pyramid uses to apply the per-channel power-law ratio.
use crate::image::{ImageF32, PlanarImage};

struct AxisTap {
    src: usize,
    weight: f32,
}

/// Per-output-index taps along one axis.
fn axis_taps(n_src: usize, n_dst: usize) -> Vec<Vec<AxisTap>> {
    let mut taps = Vec::with_capacity(n_dst);
    if n_src == n_dst {
        for i in 0..n_dst {
            taps.push(vec![AxisTap {
                src: i,
                weight: 1.0,
            }]);
        }
        return taps;
    }
    let scale = n_dst as f64 / n_src as f64;
    if scale < 1.0 {
        // Area average over the source interval covered by each output sample.
        let inv = 1.0 / scale;
        for o in 0..n_dst {
            let start = o as f64 * inv;
            let end = ((o + 1) as f64 * inv).min(n_src as f64);
            let mut row = Vec::new();
            let mut s = start.floor() as usize;
            while (s as f64) < end && s < n_src {
                let lo = (s as f64).max(start);
                let hi = ((s + 1) as f64).min(end);
                let w = (hi - lo) / (end - start);
                if w > 0.0 {
                    row.push(AxisTap {
                        src: s,
                        weight: w as f32,
                    });
                }
                s += 1;
            }
            taps.push(row);
        }
    } else {
        // Bilinear interpolation between the two nearest source samples.
        for o in 0..n_dst {
            let pos = (o as f64 + 0.5) / scale - 0.5;
            let clamped = pos.clamp(0.0, (n_src - 1) as f64);
            let s0 = clamped.floor() as usize;
            let f = (clamped - s0 as f64) as f32;
            let s1 = (s0 + 1).min(n_src - 1);
            if f <= f32::EPSILON || s0 == s1 {
                taps.push(vec![AxisTap {
                    src: s0,
                    weight: 1.0,
                }]);
            } else {
                taps.push(vec![
                    AxisTap {
                        src: s0,
                        weight: 1.0 - f,
                    },
                    AxisTap { src: s1, weight: f },
                ]);
            }
        }
    }
    taps
}

/// Resample a single plane to `(dst_w, dst_h)` and multiply by `gain`.
pub fn resample(src: &ImageF32, dst_w: usize, dst_h: usize, gain: f32) -> ImageF32 {
    if dst_w == 0 || dst_h == 0 || src.w == 0 || src.h == 0 {
        return ImageF32::new(dst_w, dst_h);
    }
    if dst_w == src.w && dst_h == src.h && gain == 1.0 {
        return src.clone();
    }

    let x_taps = axis_taps(src.w, dst_w);
    let y_taps = axis_taps(src.h, dst_h);

    // Horizontal pass.
    let mut mid = ImageF32::new(dst_w, src.h);
    for y in 0..src.h {
        for (x, taps) in x_taps.iter().enumerate() {
            let mut acc = 0.0f32;
            for t in taps {
                acc += src.get(t.src, y) * t.weight;
            }
            mid.set(x, y, acc);
        }
    }

    // Vertical pass, applying the gain once.
    let mut out = ImageF32::new(dst_w, dst_h);
    for (y, taps) in y_taps.iter().enumerate() {
        for x in 0..dst_w {
            let mut acc = 0.0f32;
            for t in taps {
                acc += mid.get(x, t.src) * t.weight;
            }
            out.set(x, y, acc * gain);
        }
    }
    out
}

/// Resample every plane of a stack, multiplying by `gain`.
pub fn resample_planar(
    src: &PlanarImage<f32>,
    dst_w: usize,
    dst_h: usize,
    gain: f32,
) -> PlanarImage<f32> {
    let mut out = PlanarImage::new(dst_w, dst_h, src.n_planes);
    for p in 0..src.n_planes {
        let plane = resample(&src.plane_image(p), dst_w, dst_h, gain);
        out.plane_mut(p).copy_from_slice(&plane.data);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_copy() {
        let src = ImageF32::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = resample(&src, 3, 2, 1.0);
        assert_eq!(out.data, src.data);
    }

    #[test]
    fn downscale_preserves_mean() {
        let mut src = ImageF32::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                src.set(x, y, (x + y) as f32);
            }
        }
        let out = resample(&src, 4, 4, 1.0);
        let mean_src: f32 = src.data.iter().sum::<f32>() / 64.0;
        let mean_out: f32 = out.data.iter().sum::<f32>() / 16.0;
        assert!((mean_src - mean_out).abs() < 1e-5);
    }

    #[test]
    fn gain_scales_output() {
        let src = ImageF32::from_vec(4, 4, vec![2.0; 16]);
        let out = resample(&src, 2, 2, 1.5);
        for &v in &out.data {
            assert!((v - 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn upscale_interpolates() {
        let src = ImageF32::from_vec(2, 1, vec![0.0, 1.0]);
        let out = resample(&src, 4, 1, 1.0);
        assert!(out.get(0, 0) <= out.get(1, 0));
        assert!(out.get(1, 0) <= out.get(2, 0));
        assert!(out.get(2, 0) <= out.get(3, 0));
    }
}
