//! Per-pixel gradient magnitude and orientation.
//!
//! Gradients are centered finite differences (one-sided at borders). With a
//! multi-plane input and `color_chn == 0`, the plane with the strongest
//! response wins at each pixel; otherwise the selected plane is used alone.
//! Orientation is wrapped into [0, π) by default or [0, 2π) in `full` mode.
//!
//! When `norm_rad > 0` the magnitude is normalized by a triangle-smoothed
//! envelope: `M / (T(M) + norm_const)`.
use crate::channels::smooth::conv_tri;
use crate::image::{ImageF32, PlanarImage};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradMagOptions {
    pub enabled: bool,
    /// 0 keeps the strongest plane per pixel; k > 0 selects plane k-1.
    pub color_chn: usize,
    /// Normalization radius; 0 disables normalization.
    pub norm_rad: usize,
    pub norm_const: f64,
    /// Orientation range: false → [0, π), true → [0, 2π).
    pub full: bool,
}

impl Default for GradMagOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            color_chn: 0,
            norm_rad: 5,
            norm_const: 0.005,
            full: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Gradient {
    pub mag: ImageF32,
    pub orient: ImageF32,
    pub dx: Option<ImageF32>,
    pub dy: Option<ImageF32>,
}

#[inline]
fn diff_1d(get: impl Fn(usize) -> f32, i: usize, n: usize) -> f32 {
    if n < 2 {
        return 0.0;
    }
    if i == 0 {
        get(1) - get(0)
    } else if i == n - 1 {
        get(n - 1) - get(n - 2)
    } else {
        0.5 * (get(i + 1) - get(i - 1))
    }
}

fn plane_gradients(plane: &ImageF32) -> (ImageF32, ImageF32) {
    let (w, h) = (plane.w, plane.h);
    let mut gx = ImageF32::new(w, h);
    let mut gy = ImageF32::new(w, h);
    for y in 0..h {
        for x in 0..w {
            gx.set(x, y, diff_1d(|i| plane.get(i, y), x, w));
            gy.set(x, y, diff_1d(|i| plane.get(x, i), y, h));
        }
    }
    (gx, gy)
}

#[inline]
fn wrap_orientation(gx: f32, gy: f32, full: bool) -> f32 {
    let mut o = gy.atan2(gx);
    if full {
        if o < 0.0 {
            o += 2.0 * std::f32::consts::PI;
        }
        if o >= 2.0 * std::f32::consts::PI {
            o = 0.0;
        }
    } else {
        if o < 0.0 {
            o += std::f32::consts::PI;
        }
        if o >= std::f32::consts::PI {
            o -= std::f32::consts::PI;
        }
    }
    o
}

/// Compute magnitude and orientation for a planar stack, with optional raw
/// derivative outputs for the winning plane.
pub fn gradient_mag(
    src: &PlanarImage<f32>,
    opts: &GradMagOptions,
    keep_derivatives: bool,
) -> Gradient {
    let (w, h) = (src.w, src.h);
    let mut mag = ImageF32::new(w, h);
    let mut orient = ImageF32::new(w, h);
    let mut dx = keep_derivatives.then(|| ImageF32::new(w, h));
    let mut dy = keep_derivatives.then(|| ImageF32::new(w, h));

    let selected: Vec<usize> = if opts.color_chn > 0 {
        vec![(opts.color_chn - 1).min(src.n_planes.saturating_sub(1))]
    } else {
        (0..src.n_planes).collect()
    };

    let grads: Vec<(ImageF32, ImageF32)> = selected
        .iter()
        .map(|&p| plane_gradients(&src.plane_image(p)))
        .collect();

    for y in 0..h {
        for x in 0..w {
            let mut best = (0.0f32, 0.0f32, 0.0f32); // (m2, gx, gy)
            for (gx_p, gy_p) in &grads {
                let (gx_v, gy_v) = (gx_p.get(x, y), gy_p.get(x, y));
                let m2 = gx_v * gx_v + gy_v * gy_v;
                if m2 > best.0 {
                    best = (m2, gx_v, gy_v);
                }
            }
            mag.set(x, y, best.0.sqrt());
            orient.set(x, y, wrap_orientation(best.1, best.2, opts.full));
            if let Some(dx) = dx.as_mut() {
                dx.set(x, y, best.1);
            }
            if let Some(dy) = dy.as_mut() {
                dy.set(x, y, best.2);
            }
        }
    }

    if opts.norm_rad > 0 {
        let envelope = conv_tri(&mag, opts.norm_rad as f64);
        let norm_const = opts.norm_const as f32;
        for (m, s) in mag.data.iter_mut().zip(envelope.data.iter()) {
            *m /= *s + norm_const;
        }
    }

    Gradient {
        mag,
        orient,
        dx,
        dy,
    }
}
