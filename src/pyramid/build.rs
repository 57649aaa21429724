//! Pyramid construction: exact levels, lambda estimation, approximation.
use super::options::PyramidOptions;
use super::scales::{exact_indices, get_scales, nearest_exact};
use super::Pyramid;
use crate::channels::color::{replicate_gray, rgb_convert};
use crate::channels::resample::resample_planar;
use crate::channels::smooth::conv_tri;
use crate::channels::{compute_channels, ChannelSet, ColorSpace, PadMode};
use crate::error::{DetectorError, Result};
use crate::image::PlanarImage;
use log::debug;

/// Deterministic index shuffle (xorshift) for distributing level work.
///
/// Uniform slicing starves workers on the pyramid's geometric size
/// distribution, so indices are permuted before being handed out.
pub(crate) fn shuffled(mut indices: Vec<usize>) -> Vec<usize> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    for i in (1..indices.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state % (i as u64 + 1)) as usize;
        indices.swap(i, j);
    }
    indices
}

fn channel_dims(size: (usize, usize), scale: f64, shrink: usize) -> (usize, usize) {
    let s = shrink as f64;
    (
        (size.0 as f64 * scale / s).round() as usize,
        (size.1 as f64 * scale / s).round() as usize,
    )
}

fn type_mean(stack: &PlanarImage<f32>) -> f64 {
    if stack.data.is_empty() {
        return 0.0;
    }
    stack.data.iter().map(|&v| v as f64).sum::<f64>() / stack.data.len() as f64
}

/// Estimate per-type lambdas from two exact scales (BMVC10 power law).
fn estimate_lambdas(
    sets: &[Option<ChannelSet>],
    exact: &[usize],
    scales: &[f64],
    start: usize,
    step: usize,
    n_types: usize,
) -> Result<Vec<f64>> {
    let candidates: Vec<usize> = (start..scales.len())
        .step_by(step)
        .filter(|i| exact.binary_search(i).is_ok())
        .collect();
    if candidates.len() < 2 {
        return Err(DetectorError::config(
            "lambda estimation requires at least two exact scales; \
             supply lambdas explicitly for this configuration",
        ));
    }
    // Skip the full-resolution scale when enough candidates exist; border
    // effects bias its channel means.
    let (ia, ib) = if candidates.len() > 2 {
        (candidates[1], candidates[2])
    } else {
        (candidates[0], candidates[1])
    };

    let set_a = sets[ia].as_ref().expect("exact level computed");
    let set_b = sets[ib].as_ref().expect("exact level computed");
    let mut lambdas = Vec::with_capacity(n_types);
    for j in 0..n_types {
        let f0 = type_mean(&set_a.types[j]);
        let f1 = type_mean(&set_b.types[j]);
        let lambda = if f0 > 0.0 && f1 > 0.0 {
            -(f0 / f1).log2() / (scales[ia] / scales[ib]).log2()
        } else {
            0.0
        };
        lambdas.push(lambda);
    }
    debug!("estimated lambdas from scales {ia}/{ib}: {lambdas:?}");
    Ok(lambdas)
}

/// Grow every plane of a type by `(px, py)` cells on each side.
fn pad_stack(stack: &PlanarImage<f32>, px: usize, py: usize, mode: PadMode) -> PlanarImage<f32> {
    if px == 0 && py == 0 {
        return stack.clone();
    }
    let (w, h) = (stack.w, stack.h);
    let mut out = PlanarImage::new(w + 2 * px, h + 2 * py, stack.n_planes);
    for p in 0..stack.n_planes {
        for y in 0..out.h {
            for x in 0..out.w {
                let v = match mode {
                    PadMode::Zero => {
                        if x < px || y < py || x >= px + w || y >= py + h {
                            0.0
                        } else {
                            stack.get(p, x - px, y - py)
                        }
                    }
                    PadMode::Replicate => {
                        let sx = x.saturating_sub(px).min(w - 1);
                        let sy = y.saturating_sub(py).min(h - 1);
                        stack.get(p, sx, sy)
                    }
                };
                out.set(p, x, y, v);
            }
        }
    }
    out
}

fn approximate_level(
    i: usize,
    exact: &[usize],
    scales: &[f64],
    size: (usize, usize),
    shrink: usize,
    lambdas: &[f64],
    sets: &[Option<ChannelSet>],
) -> ChannelSet {
    let i_r = nearest_exact(i, exact);
    let reference = sets[i_r].as_ref().expect("exact level computed");
    let (tw, th) = channel_dims(size, scales[i], shrink);
    let mut types = Vec::with_capacity(reference.types.len());
    for (j, src) in reference.types.iter().enumerate() {
        let ratio = (scales[i] / scales[i_r]).powf(-lambdas[j]) as f32;
        types.push(resample_planar(src, tw, th, ratio));
    }
    ChannelSet {
        types,
        info: reference.info.clone(),
        w: tw,
        h: th,
    }
}

fn finish_level(set: &mut ChannelSet, smooth: f64, pad: (usize, usize), shrink: usize) {
    for (j, stack) in set.types.iter_mut().enumerate() {
        if smooth > 0.0 {
            for p in 0..stack.n_planes {
                let plane = conv_tri(&stack.plane_image(p), smooth);
                stack.plane_mut(p).copy_from_slice(&plane.data);
            }
        }
        if pad.0 > 0 || pad.1 > 0 {
            *stack = pad_stack(stack, pad.0 / shrink, pad.1 / shrink, set.info[j].pad_with);
        }
    }
    if pad.0 > 0 || pad.1 > 0 {
        set.w += 2 * (pad.0 / shrink);
        set.h += 2 * (pad.1 / shrink);
    }
}

/// Build the full channel pyramid for a planar float image in [0, 1].
///
/// `pre_luv` marks input that already carries scaled LUV planes. Undersized
/// images produce an empty pyramid rather than an error.
pub fn build_pyramid(
    input: &PlanarImage<f32>,
    opts_in: &PyramidOptions,
    pre_luv: bool,
    parallel: bool,
) -> Result<Pyramid> {
    let opts = opts_in.normalized();
    opts.channels.validate()?;
    let shrink = opts.channels.shrink;
    let n_approx = opts.n_approx.max(0) as usize;
    let size = (input.w, input.h);

    let (scales, scaleshw) = get_scales(
        opts.n_per_oct,
        opts.n_oct_up,
        opts.min_ds,
        shrink,
        size,
    );
    let n_scales = scales.len();
    if n_scales == 0 {
        debug!("input {}x{} below min size, empty pyramid", size.0, size.1);
        return Ok(Pyramid::empty(opts));
    }

    // Convert color once at full resolution; per-scale computation then runs
    // with a pass-through color space.
    let cs = opts.channels.color.color_space;
    let replicated;
    let full_color = if input.n_planes == 1 && cs.output_planes() == 3 && !pre_luv {
        replicated = replicate_gray(input);
        &replicated
    } else {
        input
    };
    let converted = rgb_convert(full_color, cs, pre_luv)?;
    let mut chn_opts = opts.channels;
    chn_opts.color.color_space = ColorSpace::Orig;

    let exact = exact_indices(n_scales, n_approx);
    let mut sets: Vec<Option<ChannelSet>> = vec![None; n_scales];

    // Exact levels, largest first; the half-scale level becomes the resample
    // source for everything below it when approximation is active.
    let mut source = converted;
    for &i in &exact {
        let s = scales[i];
        let (cw, ch) = channel_dims(size, s, shrink);
        let (tw, th) = (cw * shrink, ch * shrink);
        let resized = if (tw, th) == (source.w, source.h) {
            source.clone()
        } else {
            resample_planar(&source, tw, th, 1.0)
        };
        if s == 0.5 && (n_approx > 0 || opts.n_per_oct == 1) {
            source = resized.clone();
        }
        sets[i] = Some(compute_channels(&resized, &chn_opts, false)?);
    }

    let first = sets[exact[0]].as_ref().expect("first exact level");
    let n_types = first.types.len();
    let info = first.info.clone();

    let lambdas = if !opts.lambdas.is_empty() {
        if opts.lambdas.len() != n_types {
            return Err(DetectorError::config(format!(
                "expected {} lambdas, got {}",
                n_types,
                opts.lambdas.len()
            )));
        }
        opts.lambdas.clone()
    } else if n_approx > 0 && exact.len() >= 2 {
        estimate_lambdas(
            &sets,
            &exact,
            &scales,
            opts.n_oct_up * opts.n_per_oct,
            n_approx + 1,
            n_types,
        )?
    } else {
        vec![0.0; n_types]
    };

    // Approximate levels in shuffled order.
    let approx: Vec<usize> = (0..n_scales)
        .filter(|i| exact.binary_search(i).is_err())
        .collect();
    let order = shuffled(approx);
    let computed = run_over_indices(&order, parallel, |i| {
        approximate_level(i, &exact, &scales, size, shrink, &lambdas, &sets)
    });
    for (i, set) in order.iter().zip(computed) {
        sets[*i] = Some(set);
    }

    // Smoothing and padding over every level.
    let mut levels: Vec<ChannelSet> = sets
        .into_iter()
        .map(|s| s.expect("all levels computed"))
        .collect();
    let smooth = opts.smooth;
    let pad = opts.pad;
    run_over_mut(&mut levels, parallel, |set| {
        finish_level(set, smooth, pad, shrink);
    });

    let banks = levels.iter().map(ChannelSet::concat).collect();
    Ok(Pyramid {
        levels: banks,
        scales,
        scaleshw,
        info,
        lambdas,
        n_types,
        rois: Vec::new(),
        opts,
    })
}

#[cfg(feature = "parallel")]
fn run_over_indices<F, R>(indices: &[usize], parallel: bool, f: F) -> Vec<R>
where
    F: Fn(usize) -> R + Sync,
    R: Send,
{
    use rayon::prelude::*;
    if parallel {
        indices.par_iter().map(|&i| f(i)).collect()
    } else {
        indices.iter().map(|&i| f(i)).collect()
    }
}

#[cfg(not(feature = "parallel"))]
fn run_over_indices<F, R>(indices: &[usize], _parallel: bool, f: F) -> Vec<R>
where
    F: Fn(usize) -> R,
{
    indices.iter().map(|&i| f(i)).collect()
}

#[cfg(feature = "parallel")]
fn run_over_mut<T, F>(items: &mut [T], parallel: bool, f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync,
{
    use rayon::prelude::*;
    if parallel {
        items.par_iter_mut().for_each(|t| f(t));
    } else {
        items.iter_mut().for_each(|t| f(t));
    }
}

#[cfg(not(feature = "parallel"))]
fn run_over_mut<T, F>(items: &mut [T], _parallel: bool, f: F)
where
    F: Fn(&mut T),
{
    items.iter_mut().for_each(|t| f(t));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pyramid::scales::scale_count;

    fn test_image(w: usize, h: usize) -> PlanarImage<f32> {
        let mut img = PlanarImage::new(w, h, 3);
        for p in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let v = ((x * 7 + y * 13 + p * 29) % 64) as f32 / 64.0;
                    img.set(p, x, y, v);
                }
            }
        }
        img
    }

    #[test]
    fn level_count_matches_formula() {
        let img = test_image(160, 120);
        let opts = PyramidOptions::default();
        let pyr = build_pyramid(&img, &opts, false, false).unwrap();
        let expected = scale_count(8, 0, (16, 16), (160, 120));
        assert_eq!(pyr.n_scales(), expected);
        assert!((pyr.scales[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn levels_sorted_by_decreasing_resolution() {
        let img = test_image(160, 120);
        let pyr = build_pyramid(&img, &PyramidOptions::default(), false, false).unwrap();
        for pair in pyr.levels.windows(2) {
            assert!(pair[0].width() >= pair[1].width());
            assert!(pair[0].height() >= pair[1].height());
        }
    }

    #[test]
    fn level_dims_match_rounded_scales() {
        let img = test_image(164, 118);
        let pyr = build_pyramid(&img, &PyramidOptions::default(), false, false).unwrap();
        let shrink = pyr.opts.channels.shrink;
        for (i, bank) in pyr.levels.iter().enumerate() {
            let (cw, ch) = channel_dims((164, 118), pyr.scales[i], shrink);
            assert_eq!((bank.width(), bank.height()), (cw, ch), "level {i}");
            assert_eq!(bank.data.plane_stride, cw * ch);
        }
    }

    #[test]
    fn no_approx_means_every_level_exact() {
        let img = test_image(96, 96);
        let opts = PyramidOptions {
            n_approx: 0,
            ..Default::default()
        };
        let pyr = build_pyramid(&img, &opts, false, false).unwrap();
        // Lambdas are never consulted: they stay at their unused default.
        assert!(pyr.lambdas.iter().all(|&l| l == 0.0));
        assert!(pyr.n_scales() > 0);
    }

    #[test]
    fn undersized_image_yields_empty_pyramid() {
        let img = test_image(12, 12);
        let pyr = build_pyramid(&img, &PyramidOptions::default(), false, false).unwrap();
        assert_eq!(pyr.n_scales(), 0);
    }

    #[test]
    fn padding_grows_channel_dims() {
        let img = test_image(96, 96);
        let opts = PyramidOptions {
            pad: (8, 4),
            ..Default::default()
        };
        let pyr = build_pyramid(&img, &opts, false, false).unwrap();
        let base = build_pyramid(&img, &PyramidOptions::default(), false, false).unwrap();
        assert_eq!(pyr.levels[0].width(), base.levels[0].width() + 2 * (8 / 4));
        assert_eq!(pyr.levels[0].height(), base.levels[0].height() + 2 * (4 / 4));
    }

    #[test]
    fn parallel_and_serial_agree() {
        let img = test_image(128, 96);
        let opts = PyramidOptions::default();
        let a = build_pyramid(&img, &opts, false, false).unwrap();
        let b = build_pyramid(&img, &opts, false, true).unwrap();
        assert_eq!(a.n_scales(), b.n_scales());
        for (la, lb) in a.levels.iter().zip(&b.levels) {
            assert_eq!(la.data.data, lb.data.data);
        }
    }
}
