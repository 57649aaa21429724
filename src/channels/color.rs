//! Color space normalization for the channel pipeline.
//!
//! Input is an H×W stack of 1 or 3 planes in [0, 1]. The LUV path follows the
//! CIE L*u*v* transform with a fixed RGB→XYZ matrix and rescales the result
//! into ≈[0, 1] with `L/270`, `(u+88)/270`, `(v+134)/270`; dividing by a
//! single constant keeps the space perceptually uniform. Grayscale uses
//! BT.601-style luminance weights in single precision.
use crate::error::{DetectorError, Result};
use crate::image::{ImageU8, ImageView, PlanarImage, RgbU8};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    Gray,
    Rgb,
    Luv,
    Hsv,
    /// Pass the input through unchanged (any plane count).
    Orig,
}

impl ColorSpace {
    pub fn output_planes(self) -> usize {
        match self {
            ColorSpace::Gray => 1,
            _ => 3,
        }
    }
}

const GRAY_WEIGHTS: [f32; 3] = [0.298_936_02, 0.587_043_07, 0.114_020_904];

const Y0: f32 = 0.008_856_451_7; // (6/29)^3
const LUV_A: f32 = 903.296_3; // (29/3)^3
const UN: f32 = 0.197_833;
const VN: f32 = 0.468_331;
const LUV_SCALE: f32 = 1.0 / 270.0;

fn rgb_to_xyz() -> Matrix3<f32> {
    Matrix3::new(
        0.430_574, 0.341_550, 0.178_325, //
        0.222_015, 0.706_655, 0.071_330, //
        0.020_183, 0.129_553, 0.939_180,
    )
}

/// Transform one RGB sample (components in [0, 1]) into scaled LUV.
#[inline]
pub fn rgb_to_luv_pixel(rgb: Vector3<f32>) -> Vector3<f32> {
    let xyz = rgb_to_xyz() * rgb;
    let denom = xyz.x + 15.0 * xyz.y + 3.0 * xyz.z + 1e-35;
    let z = 1.0 / denom;

    let l = if xyz.y > Y0 {
        116.0 * xyz.y.powf(1.0 / 3.0) - 16.0
    } else {
        xyz.y * LUV_A
    } * LUV_SCALE;

    let u = l * (52.0 * xyz.x * z - 13.0 * UN) + 88.0 * LUV_SCALE;
    let v = l * (117.0 * xyz.y * z - 13.0 * VN) + 134.0 * LUV_SCALE;
    Vector3::new(l, u, v)
}

#[inline]
fn rgb_to_hsv_pixel(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta <= 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    } / 6.0;
    (h, s, v)
}

/// Convert an interleaved 8-bit color view into a planar float stack in [0, 1].
pub fn planar_from_rgb8(view: &RgbU8<'_>) -> PlanarImage<f32> {
    let mut out = PlanarImage::new(view.w, view.h, 3);
    for y in 0..view.h {
        for x in 0..view.w {
            let [r, g, b] = view.pixel(x, y);
            out.set(0, x, y, r as f32 / 255.0);
            out.set(1, x, y, g as f32 / 255.0);
            out.set(2, x, y, b as f32 / 255.0);
        }
    }
    out
}

/// Convert an 8-bit grayscale view into a single-plane float stack in [0, 1].
pub fn planar_from_gray8(view: &ImageU8<'_>) -> PlanarImage<f32> {
    let mut out = PlanarImage::new(view.w, view.h, 1);
    for y in 0..view.h {
        let row = view.row(y);
        for (x, &v) in row.iter().enumerate() {
            out.set(0, x, y, v as f32 / 255.0);
        }
    }
    out
}

/// Normalize a planar float stack into the requested color space.
///
/// `pre_luv` asserts the input already carries LUV-scaled data, in which case
/// the stack passes through untouched (the accelerated channel stage hands the
/// conversion result straight to the pyramid this way).
pub fn rgb_convert(
    src: &PlanarImage<f32>,
    target: ColorSpace,
    pre_luv: bool,
) -> Result<PlanarImage<f32>> {
    if target == ColorSpace::Orig {
        return Ok(src.clone());
    }

    if src.n_planes == 1 {
        if target == ColorSpace::Gray {
            return Ok(src.clone());
        }
        return Err(DetectorError::config(format!(
            "single-plane input cannot be converted to {target:?}"
        )));
    }

    if pre_luv {
        if target != ColorSpace::Luv {
            return Err(DetectorError::config(
                "pre-converted LUV input requires the luv color space",
            ));
        }
        return Ok(src.clone());
    }

    if src.n_planes != 3 {
        return Err(DetectorError::config(format!(
            "expected 3 input planes, got {}",
            src.n_planes
        )));
    }

    match target {
        ColorSpace::Rgb => Ok(src.clone()),
        ColorSpace::Gray => {
            let mut out = PlanarImage::new(src.w, src.h, 1);
            for i in 0..src.plane_stride {
                out.data[i] = GRAY_WEIGHTS[0] * src.data[i]
                    + GRAY_WEIGHTS[1] * src.data[src.plane_stride + i]
                    + GRAY_WEIGHTS[2] * src.data[2 * src.plane_stride + i];
            }
            Ok(out)
        }
        ColorSpace::Luv => {
            let mut out = PlanarImage::new(src.w, src.h, 3);
            for i in 0..src.plane_stride {
                let rgb = Vector3::new(
                    src.data[i],
                    src.data[src.plane_stride + i],
                    src.data[2 * src.plane_stride + i],
                );
                let luv = rgb_to_luv_pixel(rgb);
                out.data[i] = luv.x;
                out.data[src.plane_stride + i] = luv.y;
                out.data[2 * src.plane_stride + i] = luv.z;
            }
            Ok(out)
        }
        ColorSpace::Hsv => {
            let mut out = PlanarImage::new(src.w, src.h, 3);
            for i in 0..src.plane_stride {
                let (h, s, v) = rgb_to_hsv_pixel(
                    src.data[i],
                    src.data[src.plane_stride + i],
                    src.data[2 * src.plane_stride + i],
                );
                out.data[i] = h;
                out.data[src.plane_stride + i] = s;
                out.data[2 * src.plane_stride + i] = v;
            }
            Ok(out)
        }
        ColorSpace::Orig => unreachable!("handled above"),
    }
}

/// Replicate a single-plane stack across three planes.
///
/// Grayscale inputs with a color target are up-converted this way before
/// conversion, reproducing the behavior detectors have been trained against.
pub fn replicate_gray(src: &PlanarImage<f32>) -> PlanarImage<f32> {
    assert_eq!(src.n_planes, 1, "replication expects a single plane");
    let mut out = PlanarImage::new(src.w, src.h, 3);
    for p in 0..3 {
        out.plane_mut(p).copy_from_slice(src.plane(0));
    }
    out
}
