//! Scale schedule for the feature pyramid.
//!
//! Each raw scale `2^(-i/nPerOct + nOctUp)` is nudged inside a ±shrink/4
//! bracket so that the resized image dimensions are exact multiples of the
//! shrink factor while the worst per-axis rounding error is minimized; the
//! smaller image dimension anchors the bracket. The schedule always carries
//! exactly `scale_count` entries, so the level count matches the closed-form
//! formula even when neighbouring scales round to the same value. The exact
//! per-axis factors actually realized by the rounding are reported
//! separately since height and width may differ by one pixel.

/// Number of scales for an image of size `(w, h)`.
pub fn scale_count(
    n_per_oct: usize,
    n_oct_up: usize,
    min_ds: (usize, usize),
    size: (usize, usize),
) -> usize {
    let (w, h) = size;
    let (min_w, min_h) = min_ds;
    if w == 0 || h == 0 || min_w == 0 || min_h == 0 {
        return 0;
    }
    let ratio = (w as f64 / min_w as f64).min(h as f64 / min_h as f64);
    if ratio < 1.0 {
        return 0;
    }
    let n = (n_per_oct as f64 * (n_oct_up as f64 + ratio.log2()) + 1.0).floor();
    n.max(0.0) as usize
}

/// Compute the approximate scale list and the exact per-axis factors.
///
/// Returns `(scales, scaleshw)` where `scaleshw[i]` holds the exact
/// (width, height) resampling factors realized at scale `i`.
pub fn get_scales(
    n_per_oct: usize,
    n_oct_up: usize,
    min_ds: (usize, usize),
    shrink: usize,
    size: (usize, usize),
) -> (Vec<f64>, Vec<(f64, f64)>) {
    let (w, h) = size;
    let n_scales = scale_count(n_per_oct, n_oct_up, min_ds, size);
    if n_scales == 0 {
        return (Vec::new(), Vec::new());
    }

    let d0 = w.min(h) as f64;
    let d1 = w.max(h) as f64;
    let shrink_f = shrink as f64;

    let mut scales = Vec::with_capacity(n_scales);
    let mut scaleshw = Vec::with_capacity(n_scales);
    for i in 0..n_scales {
        let s = 2f64.powf(-(i as f64) / n_per_oct as f64 + n_oct_up as f64);
        let s0 = ((d0 * s / shrink_f).round() * shrink_f - 0.25 * shrink_f) / d0;
        let s1 = ((d0 * s / shrink_f).round() * shrink_f + 0.25 * shrink_f) / d0;
        let mut best = (0.0f64, f64::MAX);
        let mut j = 0.0f64;
        while j < 1.0 - f64::EPSILON {
            let ss = j * (s1 - s0) + s0;
            let e0 = (d0 * ss - (d0 * ss / shrink_f).round() * shrink_f).abs();
            let e1 = (d1 * ss - (d1 * ss / shrink_f).round() * shrink_f).abs();
            let es = e0.max(e1);
            if es < best.1 {
                best = (ss, es);
            }
            j += 0.01;
        }
        let s = best.0;
        scales.push(s);
        let sw = (w as f64 * s / shrink_f).round() * shrink_f / w as f64;
        let sh = (h as f64 * s / shrink_f).round() * shrink_f / h as f64;
        scaleshw.push((sw, sh));
    }

    (scales, scaleshw)
}

/// Indices computed exactly (every `n_approx + 1` levels, starting at 0).
pub fn exact_indices(n_scales: usize, n_approx: usize) -> Vec<usize> {
    (0..n_scales).filter(|i| i % (n_approx + 1) == 0).collect()
}

/// Nearest exact index for an approximate level; ties round toward the
/// lower index.
pub fn nearest_exact(index: usize, exact: &[usize]) -> usize {
    debug_assert!(!exact.is_empty());
    let mut best = exact[0];
    let mut best_dist = usize::MAX;
    for &e in exact {
        let dist = index.abs_diff(e);
        if dist < best_dist {
            best = e;
            best_dist = dist;
        }
    }
    best
}
