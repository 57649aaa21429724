//! Individual pass semantics for the tiled channel stage.
//!
//! Each variant corresponds to one shader pass; the software executor
//! reproduces the per-texel arithmetic so the stage commits to the same
//! feature contract as the CPU channel path (semantics, scale layout, and
//! plane ordering match; bit-exactness is not required).
use super::graph::Texture;
use crate::channels::color::rgb_to_luv_pixel;
use crate::channels::resample::resample_planar;
use crate::channels::smooth::conv_tri;
use crate::error::{DetectorError, Result};
use crate::image::PlanarImage;
use nalgebra::Vector3;

#[derive(Clone, Debug)]
pub enum PassKind {
    /// The input frame itself.
    Source,
    /// Rotate by quarter turns (input orientation correction).
    Rotate { quarter_turns: u8 },
    /// Separable triangle smoothing.
    Smooth { radius: f64 },
    /// RGB → scaled LUV.
    Rgb2Luv,
    /// Resample to a fixed size (one pyramid level).
    Resample { w: usize, h: usize },
    /// Integer box reduction by `factor` (area average).
    Reduce { factor: usize },
    /// Strongest-plane gradient: outputs [magnitude, orientation].
    Gradient { full: bool },
    /// Triangle-envelope magnitude normalization; orientation passes through.
    GradNorm { radius: f64, norm_const: f64 },
    /// Per-texel soft orientation votes for `count` bins starting at `first`.
    HistBins {
        first: usize,
        count: usize,
        n_orients: usize,
        full: bool,
    },
    /// Plane selection (swizzle): keep `count` planes starting at `first`.
    Select { first: usize, count: usize },
    /// Grow borders by (x, y) texels; replicate edges or fill with zero.
    Pad { x: usize, y: usize, replicate: bool },
    /// Two-input plane concatenation (channel-order packing).
    Merge2,
}

fn select(tex: &Texture, first: usize, count: usize) -> Result<Texture> {
    if first + count > tex.n_planes {
        return Err(DetectorError::gpu(format!(
            "select {first}..{} exceeds {} planes",
            first + count,
            tex.n_planes
        )));
    }
    let mut out = PlanarImage::new(tex.w, tex.h, count);
    for p in 0..count {
        out.plane_mut(p).copy_from_slice(tex.plane(first + p));
    }
    Ok(out)
}

fn pad(tex: &Texture, px: usize, py: usize, replicate: bool) -> Texture {
    if px == 0 && py == 0 {
        return tex.clone();
    }
    let mut out = PlanarImage::new(tex.w + 2 * px, tex.h + 2 * py, tex.n_planes);
    for p in 0..tex.n_planes {
        for y in 0..out.h {
            for x in 0..out.w {
                let v = if replicate {
                    let sx = x.saturating_sub(px).min(tex.w - 1);
                    let sy = y.saturating_sub(py).min(tex.h - 1);
                    tex.get(p, sx, sy)
                } else if x < px || y < py || x >= px + tex.w || y >= py + tex.h {
                    0.0
                } else {
                    tex.get(p, x - px, y - py)
                };
                out.set(p, x, y, v);
            }
        }
    }
    out
}

fn rotate(tex: &Texture, quarter_turns: u8) -> Texture {
    let turns = quarter_turns % 4;
    if turns == 0 {
        return tex.clone();
    }
    let (w, h) = match turns {
        1 | 3 => (tex.h, tex.w),
        _ => (tex.w, tex.h),
    };
    let mut out = PlanarImage::new(w, h, tex.n_planes);
    for p in 0..tex.n_planes {
        for y in 0..tex.h {
            for x in 0..tex.w {
                let (nx, ny) = match turns {
                    1 => (tex.h - 1 - y, x),
                    2 => (tex.w - 1 - x, tex.h - 1 - y),
                    _ => (y, tex.w - 1 - x),
                };
                out.set(p, nx, ny, tex.get(p, x, y));
            }
        }
    }
    out
}

fn smooth(tex: &Texture, radius: f64) -> Texture {
    let mut out = tex.clone();
    for p in 0..tex.n_planes {
        let plane = conv_tri(&tex.plane_image(p), radius);
        out.plane_mut(p).copy_from_slice(&plane.data);
    }
    out
}

fn rgb2luv(tex: &Texture) -> Result<Texture> {
    if tex.n_planes < 3 {
        return Err(DetectorError::gpu("rgb2luv needs three input planes"));
    }
    let mut out = PlanarImage::new(tex.w, tex.h, 3);
    for i in 0..tex.plane_stride {
        let luv = rgb_to_luv_pixel(Vector3::new(
            tex.data[i],
            tex.data[tex.plane_stride + i],
            tex.data[2 * tex.plane_stride + i],
        ));
        out.data[i] = luv.x;
        out.data[out.plane_stride + i] = luv.y;
        out.data[2 * out.plane_stride + i] = luv.z;
    }
    Ok(out)
}

fn gradient(tex: &Texture, full: bool) -> Texture {
    let opts = crate::channels::GradMagOptions {
        enabled: true,
        color_chn: 0,
        norm_rad: 0,
        norm_const: 0.0,
        full,
    };
    let g = crate::channels::gradient::gradient_mag(tex, &opts, false);
    let mut out = PlanarImage::new(tex.w, tex.h, 2);
    out.plane_mut(0).copy_from_slice(&g.mag.data);
    out.plane_mut(1).copy_from_slice(&g.orient.data);
    out
}

fn grad_norm(tex: &Texture, radius: f64, norm_const: f64) -> Result<Texture> {
    if tex.n_planes != 2 {
        return Err(DetectorError::gpu("gradient normalization expects [mag, orient]"));
    }
    let envelope = conv_tri(&tex.plane_image(0), radius);
    let mut out = tex.clone();
    let c = norm_const as f32;
    for (m, s) in out.plane_mut(0).iter_mut().zip(envelope.data.iter()) {
        *m /= *s + c;
    }
    Ok(out)
}

fn hist_bins(tex: &Texture, first: usize, count: usize, n_orients: usize, full: bool) -> Result<Texture> {
    if tex.n_planes != 2 {
        return Err(DetectorError::gpu("orientation binning expects [mag, orient]"));
    }
    let range = if full {
        2.0 * std::f32::consts::PI
    } else {
        std::f32::consts::PI
    };
    let mut out = PlanarImage::new(tex.w, tex.h, count);
    for i in 0..tex.plane_stride {
        let m = tex.data[i];
        if m == 0.0 {
            continue;
        }
        let o = tex.data[tex.plane_stride + i];
        let t = o / range * n_orients as f32;
        let b0 = t.floor() as usize % n_orients;
        let frac = t - t.floor();
        let b1 = (b0 + 1) % n_orients;
        for (bin, weight) in [(b0, m * (1.0 - frac)), (b1, m * frac)] {
            if weight > 0.0 && bin >= first && bin < first + count {
                out.data[(bin - first) * out.plane_stride + i] += weight;
            }
        }
    }
    Ok(out)
}

fn merge2(a: &Texture, b: &Texture) -> Result<Texture> {
    if (a.w, a.h) != (b.w, b.h) {
        return Err(DetectorError::gpu(format!(
            "merge inputs differ: {}x{} vs {}x{}",
            a.w, a.h, b.w, b.h
        )));
    }
    let mut out = a.clone();
    out.append(b);
    Ok(out)
}

fn expect_one<'a>(inputs: &[&'a Texture], pass: &str) -> Result<&'a Texture> {
    match inputs {
        [one] => Ok(one),
        _ => Err(DetectorError::gpu(format!(
            "{pass} expects one input, got {}",
            inputs.len()
        ))),
    }
}

/// Execute one pass against its input textures.
pub fn run_pass(pass: &PassKind, inputs: &[&Texture], source: &Texture) -> Result<Texture> {
    match pass {
        PassKind::Source => Ok(source.clone()),
        PassKind::Rotate { quarter_turns } => {
            Ok(rotate(expect_one(inputs, "rotate")?, *quarter_turns))
        }
        PassKind::Smooth { radius } => Ok(smooth(expect_one(inputs, "smooth")?, *radius)),
        PassKind::Rgb2Luv => rgb2luv(expect_one(inputs, "rgb2luv")?),
        PassKind::Resample { w, h } => {
            Ok(resample_planar(expect_one(inputs, "resample")?, *w, *h, 1.0))
        }
        PassKind::Reduce { factor } => {
            let tex = expect_one(inputs, "reduce")?;
            Ok(resample_planar(
                tex,
                (tex.w / factor).max(1),
                (tex.h / factor).max(1),
                1.0,
            ))
        }
        PassKind::Gradient { full } => Ok(gradient(expect_one(inputs, "gradient")?, *full)),
        PassKind::GradNorm { radius, norm_const } => {
            grad_norm(expect_one(inputs, "gradNorm")?, *radius, *norm_const)
        }
        PassKind::HistBins {
            first,
            count,
            n_orients,
            full,
        } => hist_bins(expect_one(inputs, "histBins")?, *first, *count, *n_orients, *full),
        PassKind::Select { first, count } => select(expect_one(inputs, "select")?, *first, *count),
        PassKind::Pad { x, y, replicate } => {
            Ok(pad(expect_one(inputs, "pad")?, *x, *y, *replicate))
        }
        PassKind::Merge2 => match inputs {
            [a, b] => merge2(a, b),
            _ => Err(DetectorError::gpu("merge expects two inputs")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_rgb(w: usize, h: usize) -> Texture {
        let mut t = PlanarImage::new(w, h, 3);
        for p in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    t.set(p, x, y, x as f32 / w as f32);
                }
            }
        }
        t
    }

    #[test]
    fn rotate_quarter_turn_transposes_dims() {
        let t = ramp_rgb(8, 4);
        let r = rotate(&t, 1);
        assert_eq!((r.w, r.h), (4, 8));
        // Top-left moves to top-right column.
        assert_eq!(r.get(0, 3, 0), t.get(0, 0, 0));
        let back = rotate(&rotate(&rotate(&r, 1), 1), 1);
        assert_eq!(back.data, t.data);
    }

    #[test]
    fn luv_pass_matches_cpu_conversion() {
        let t = ramp_rgb(4, 4);
        let gpu = rgb2luv(&t).unwrap();
        let cpu = crate::channels::color::rgb_convert(
            &t,
            crate::channels::ColorSpace::Luv,
            false,
        )
        .unwrap();
        for (a, b) in gpu.data.iter().zip(&cpu.data) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn hist_bins_split_covers_all_orientations() {
        let mut mo = PlanarImage::new(4, 4, 2);
        for i in 0..16 {
            mo.data[i] = 1.0;
            mo.data[16 + i] = std::f32::consts::PI * (i as f32 / 16.0);
        }
        let lo = hist_bins(&mo, 0, 4, 6, false).unwrap();
        let hi = hist_bins(&mo, 4, 2, 6, false).unwrap();
        let total: f32 = lo.data.iter().sum::<f32>() + hi.data.iter().sum::<f32>();
        assert!((total - 16.0).abs() < 1e-5);
    }

    #[test]
    fn merge_concatenates_planes() {
        let a = ramp_rgb(4, 4);
        let b = ramp_rgb(4, 4);
        let m = merge2(&a, &b).unwrap();
        assert_eq!(m.n_planes, 6);
        assert_eq!(m.plane(3), b.plane(0));
    }
}
