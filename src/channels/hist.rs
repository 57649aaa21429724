//! Oriented gradient histograms over a downsampled cell grid.
//!
//! Every pixel votes its gradient magnitude into orientation bins indexed by
//! its orientation. With soft orientation binning (`soft_bin >= 0`) the vote
//! splits linearly between the two nearest bins; odd `soft_bin` additionally
//! interpolates the vote bilinearly across the four neighbouring cells.
//! Votes are scaled by `1/bin²` so cell responses stay comparable across
//! aggregation sizes.
use crate::image::{ImageF32, PlanarImage};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradHistOptions {
    pub enabled: bool,
    /// Aggregation cell size; defaults to the channel shrink factor.
    pub bin_size: Option<usize>,
    pub n_orients: usize,
    /// >= 0: soft orientation binning; odd: also soft spatial binning.
    pub soft_bin: i32,
    /// 0: plain histograms, 1: block-normalized HOG output (4·n_orients planes).
    pub use_hog: u8,
    pub clip_hog: f32,
}

impl Default for GradHistOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            bin_size: None,
            n_orients: 6,
            soft_bin: 0,
            use_hog: 0,
            clip_hog: 0.2,
        }
    }
}

#[inline]
fn quantize(o: f32, n: usize, full: bool, interpolate: bool) -> (usize, usize, f32, f32) {
    let range = if full {
        2.0 * std::f32::consts::PI
    } else {
        std::f32::consts::PI
    };
    let t = o / range * n as f32;
    if interpolate {
        let b0 = t.floor() as usize % n;
        let frac = t - t.floor();
        ((b0) % n, (b0 + 1) % n, 1.0 - frac, frac)
    } else {
        let b = (t + 0.5).floor() as usize % n;
        (b, b, 1.0, 0.0)
    }
}

/// Accumulate oriented histograms at cell resolution `bin`.
///
/// Output has `n_orients` planes of size `(w/bin, h/bin)`; with
/// `use_hog == 1` the result is expanded to `4·n_orients` block-normalized
/// planes clipped at `clip_hog`.
pub fn gradient_hist(
    mag: &ImageF32,
    orient: &ImageF32,
    opts: &GradHistOptions,
    bin: usize,
    full: bool,
) -> PlanarImage<f32> {
    let n = opts.n_orients;
    let wb = mag.w / bin;
    let hb = mag.h / bin;
    let (w0, h0) = (wb * bin, hb * bin);
    let mut hist = PlanarImage::new(wb, hb, n);
    if wb == 0 || hb == 0 {
        return hist;
    }

    let vote_scale = 1.0 / (bin * bin) as f32;
    let interpolate = opts.soft_bin >= 0;
    let soft_spatial = opts.soft_bin % 2 != 0 && bin > 1;

    for y in 0..h0 {
        for x in 0..w0 {
            let m = mag.get(x, y) * vote_scale;
            if m == 0.0 {
                continue;
            }
            let (b0, b1, w_b0, w_b1) = quantize(orient.get(x, y), n, full, interpolate);

            if soft_spatial {
                // Bilinear spatial interpolation across the four nearest cells;
                // contributions falling outside the grid are dropped.
                let cxf = (x as f32 + 0.5) / bin as f32 - 0.5;
                let cyf = (y as f32 + 0.5) / bin as f32 - 0.5;
                let cx0 = cxf.floor();
                let cy0 = cyf.floor();
                let fx = cxf - cx0;
                let fy = cyf - cy0;
                for (dcx, wx) in [(0i64, 1.0 - fx), (1i64, fx)] {
                    for (dcy, wy) in [(0i64, 1.0 - fy), (1i64, fy)] {
                        let cx = cx0 as i64 + dcx;
                        let cy = cy0 as i64 + dcy;
                        if cx < 0 || cy < 0 || cx >= wb as i64 || cy >= hb as i64 {
                            continue;
                        }
                        let weight = wx * wy;
                        if weight == 0.0 {
                            continue;
                        }
                        let (cx, cy) = (cx as usize, cy as usize);
                        let i0 = hist.idx(b0, cx, cy);
                        hist.data[i0] += m * w_b0 * weight;
                        if w_b1 > 0.0 {
                            let i1 = hist.idx(b1, cx, cy);
                            hist.data[i1] += m * w_b1 * weight;
                        }
                    }
                }
            } else {
                let (cx, cy) = (x / bin, y / bin);
                let i0 = hist.idx(b0, cx, cy);
                hist.data[i0] += m * w_b0;
                if w_b1 > 0.0 {
                    let i1 = hist.idx(b1, cx, cy);
                    hist.data[i1] += m * w_b1;
                }
            }
        }
    }

    match opts.use_hog {
        0 => hist,
        _ => hog_normalize(&hist, opts.clip_hog),
    }
}

/// Normalize every cell by its four surrounding 2×2 block energies, clipping
/// at `clip`. The output carries `4·n_orients` planes: one copy of the
/// histogram per normalization block.
fn hog_normalize(hist: &PlanarImage<f32>, clip: f32) -> PlanarImage<f32> {
    const EPS: f32 = 1e-4;
    let (wb, hb, n) = (hist.w, hist.h, hist.n_planes);
    // Per-cell gradient energy.
    let mut energy = ImageF32::new(wb, hb);
    for p in 0..n {
        let plane = hist.plane(p);
        for (i, &v) in plane.iter().enumerate() {
            energy.data[i] += v * v;
        }
    }

    let clamp = |v: i64, n: usize| -> usize { v.clamp(0, n as i64 - 1) as usize };
    let block_energy = |cx: usize, cy: usize, dx: i64, dy: i64| -> f32 {
        let x1 = clamp(cx as i64 + dx, wb);
        let y1 = clamp(cy as i64 + dy, hb);
        energy.get(cx, cy) + energy.get(x1, cy) + energy.get(cx, y1) + energy.get(x1, y1)
    };

    let mut out = PlanarImage::new(wb, hb, 4 * n);
    let offsets: [(i64, i64); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];
    for (k, &(dx, dy)) in offsets.iter().enumerate() {
        for cy in 0..hb {
            for cx in 0..wb {
                let norm = 1.0 / (block_energy(cx, cy, dx, dy) + EPS).sqrt();
                for o in 0..n {
                    let v = (hist.get(o, cx, cy) * norm).min(clip);
                    out.set(k * n + o, cx, cy, v);
                }
            }
        }
    }
    out
}
