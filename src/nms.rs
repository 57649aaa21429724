//! Non-maximum suppression of overlapping detections.
//!
//! The default mode is greedy: boxes are visited in order of decreasing
//! score, and a box that has been suppressed can no longer suppress others.
//! Overlap is intersection divided by either the union or the smaller of the
//! two areas. Large inputs can be split in half and suppressed recursively
//! (`maxn`), and a mean-shift mode merges detections in scale space instead
//! of discarding them.
use crate::types::Detection;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NmsKind {
    None,
    Max,
    #[serde(rename = "maxg")]
    MaxGreedy,
    /// Mean-shift merging in (x, y, log2 w, log2 h) space.
    Ms,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapDenom {
    Union,
    Min,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NmsOptions {
    pub kind: NmsKind,
    /// Discard detections below this score first (mean-shift defaults to 0).
    pub thr: Option<f32>,
    /// Split-and-recurse threshold for large inputs.
    pub maxn: Option<usize>,
    /// Mean-shift suppression radii along (x, y, log2 w, log2 h).
    pub radii: [f64; 4],
    pub overlap: f32,
    pub ovr_denom: OverlapDenom,
    /// Suppress each object class independently.
    pub separate: bool,
}

impl Default for NmsOptions {
    fn default() -> Self {
        Self {
            kind: NmsKind::MaxGreedy,
            thr: None,
            maxn: None,
            radii: [0.15, 0.15, 1.0, 1.0],
            overlap: 0.65,
            ovr_denom: OverlapDenom::Min,
            separate: false,
        }
    }
}

fn sort_descending(dets: &mut [Detection]) {
    dets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

fn nms_max(dets: &[Detection], overlap: f32, greedy: bool, denom: OverlapDenom) -> Vec<Detection> {
    let mut sorted = dets.to_vec();
    sort_descending(&mut sorted);
    let n = sorted.len();
    let mut keep = vec![true; n];
    for i in 0..n {
        if greedy && !keep[i] {
            continue;
        }
        for j in (i + 1)..n {
            if !keep[j] {
                continue;
            }
            let inter = sorted[i].intersection(&sorted[j]);
            if inter <= 0.0 {
                continue;
            }
            let d = match denom {
                OverlapDenom::Union => sorted[i].area() + sorted[j].area() - inter,
                OverlapDenom::Min => sorted[i].area().min(sorted[j].area()),
            };
            if inter / d > overlap {
                keep[j] = false;
            }
        }
    }
    sorted
        .into_iter()
        .zip(keep)
        .filter_map(|(d, k)| k.then_some(d))
        .collect()
}

/// Mean-shift merging with a variable-width kernel.
///
/// Detections are mapped to (cx, cy, log2 w, log2 h), shifted to the
/// score-weighted mean of their neighborhood until convergence, and modes
/// closer than half a radius are merged; a merged detection carries the sum
/// of its members' scores.
fn nms_ms(dets: &[Detection], thr: f32, radii: [f64; 4]) -> Vec<Detection> {
    const MAX_ITERS: usize = 100;
    let points: Vec<[f64; 4]> = dets
        .iter()
        .map(|d| {
            [
                (d.x + 0.5 * d.w) as f64,
                (d.y + 0.5 * d.h) as f64,
                (d.w as f64).log2(),
                (d.h as f64).log2(),
            ]
        })
        .collect();
    let weights: Vec<f64> = dets.iter().map(|d| (d.score - thr) as f64).collect();

    // Radii for the positional dimensions scale with the box size.
    let scaled_radii = |p: &[f64; 4]| -> [f64; 4] {
        let w = 2f64.powf(p[2]);
        let h = 2f64.powf(p[3]);
        [radii[0] * w, radii[1] * h, radii[2], radii[3]]
    };
    let dist2 = |a: &[f64; 4], b: &[f64; 4], r: &[f64; 4]| -> f64 {
        (0..4).map(|k| ((a[k] - b[k]) / r[k]).powi(2)).sum()
    };

    let mut modes = Vec::with_capacity(points.len());
    for seed in &points {
        let mut m = *seed;
        for _ in 0..MAX_ITERS {
            let r = scaled_radii(&m);
            let mut acc = [0.0f64; 4];
            let mut total = 0.0f64;
            for (p, &w) in points.iter().zip(&weights) {
                if dist2(&m, p, &r) <= 1.0 {
                    for k in 0..4 {
                        acc[k] += p[k] * w;
                    }
                    total += w;
                }
            }
            if total <= 0.0 {
                break;
            }
            let next = [acc[0] / total, acc[1] / total, acc[2] / total, acc[3] / total];
            let moved = dist2(&m, &next, &r);
            m = next;
            if moved < 1e-10 {
                break;
            }
        }
        modes.push(m);
    }

    // Merge modes that converged together.
    let mut merged: Vec<([f64; 4], f64)> = Vec::new();
    for (m, &w) in modes.iter().zip(&weights) {
        let r = scaled_radii(m);
        match merged.iter_mut().find(|(c, _)| dist2(c, m, &r) < 0.25) {
            Some((_, total)) => *total += w,
            None => merged.push((*m, w)),
        }
    }

    let mut out: Vec<Detection> = merged
        .into_iter()
        .map(|(m, total)| {
            let w = 2f64.powf(m[2]) as f32;
            let h = 2f64.powf(m[3]) as f32;
            Detection::new(
                m[0] as f32 - 0.5 * w,
                m[1] as f32 - 0.5 * h,
                w,
                h,
                total as f32 + thr,
            )
        })
        .collect();
    sort_descending(&mut out);
    out
}

fn nms_once(dets: &[Detection], opts: &NmsOptions, thr: f32) -> Vec<Detection> {
    match opts.kind {
        NmsKind::None => {
            let mut out = dets.to_vec();
            sort_descending(&mut out);
            out
        }
        NmsKind::Max => nms_max(dets, opts.overlap, false, opts.ovr_denom),
        NmsKind::MaxGreedy => nms_max(dets, opts.overlap, true, opts.ovr_denom),
        NmsKind::Ms => nms_ms(dets, thr, opts.radii),
    }
}

fn nms_split(dets: &[Detection], opts: &NmsOptions, thr: f32) -> Vec<Detection> {
    if let Some(maxn) = opts.maxn {
        if dets.len() > maxn.max(2) {
            // Split along x, suppress each half, then suppress the union.
            let mut sorted = dets.to_vec();
            sorted.sort_by(|a, b| {
                a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal)
            });
            let mid = sorted.len() / 2;
            let mut lo = nms_split(&sorted[..mid], opts, thr);
            let hi = nms_split(&sorted[mid..], opts, thr);
            lo.extend(hi);
            return nms_once(&lo, opts, thr);
        }
    }
    nms_once(dets, opts, thr)
}

/// Suppress redundant detections; the result is sorted by descending score.
pub fn suppress(dets: &[Detection], opts: &NmsOptions) -> Vec<Detection> {
    if dets.is_empty() || opts.kind == NmsKind::None {
        let mut out = dets.to_vec();
        sort_descending(&mut out);
        return out;
    }

    let thr = opts
        .thr
        .unwrap_or(if opts.kind == NmsKind::Ms { 0.0 } else { f32::NEG_INFINITY });
    let filtered: Vec<Detection> = dets.iter().filter(|d| d.score >= thr).copied().collect();
    if filtered.is_empty() {
        return Vec::new();
    }

    let mut out = if opts.separate {
        let mut classes: Vec<u32> = filtered.iter().map(|d| d.class_id).collect();
        classes.sort_unstable();
        classes.dedup();
        let mut all = Vec::new();
        for class in classes {
            let subset: Vec<Detection> = filtered
                .iter()
                .filter(|d| d.class_id == class)
                .copied()
                .collect();
            all.extend(nms_split(&subset, opts, thr));
        }
        all
    } else {
        nms_split(&filtered, opts, thr)
    };
    sort_descending(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes() -> Vec<Detection> {
        vec![
            Detection::new(0.0, 0.0, 10.0, 10.0, 1.0),
            Detection::new(0.0, 1.0, 10.0, 10.0, 0.9),
            Detection::new(0.0, 2.0, 10.0, 10.0, 0.8),
            Detection::new(45.0, 45.0, 10.0, 10.0, 0.7),
        ]
    }

    fn union_opts(overlap: f32) -> NmsOptions {
        NmsOptions {
            overlap,
            ovr_denom: OverlapDenom::Union,
            ..Default::default()
        }
    }

    #[test]
    fn greedy_keeps_best_and_distant() {
        let out = suppress(&boxes(), &union_opts(0.5));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].score, 1.0);
        assert_eq!(out[1].score, 0.7);
        assert_eq!((out[0].x, out[0].y), (0.0, 0.0));
        assert_eq!((out[1].x, out[1].y), (45.0, 45.0));
    }

    #[test]
    fn suppression_is_idempotent() {
        let opts = union_opts(0.5);
        let once = suppress(&boxes(), &opts);
        let twice = suppress(&once, &opts);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(&twice) {
            assert_eq!((a.x, a.y, a.w, a.h, a.score), (b.x, b.y, b.w, b.h, b.score));
        }
    }

    #[test]
    fn min_denominator_suppresses_nested_boxes() {
        let dets = vec![
            Detection::new(0.0, 0.0, 20.0, 20.0, 1.0),
            Detection::new(5.0, 5.0, 5.0, 5.0, 0.9),
        ];
        // Intersection/union is small, intersection/min is 1.0.
        let union = suppress(&dets, &union_opts(0.5));
        assert_eq!(union.len(), 2);
        let min = suppress(
            &dets,
            &NmsOptions {
                overlap: 0.5,
                ovr_denom: OverlapDenom::Min,
                ..Default::default()
            },
        );
        assert_eq!(min.len(), 1);
    }

    #[test]
    fn threshold_prefilters_detections() {
        let opts = NmsOptions {
            thr: Some(0.85),
            ..union_opts(0.5)
        };
        let out = suppress(&boxes(), &opts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 1.0);
    }

    #[test]
    fn split_mode_matches_direct_result() {
        let direct = suppress(&boxes(), &union_opts(0.5));
        let split = suppress(
            &boxes(),
            &NmsOptions {
                maxn: Some(2),
                ..union_opts(0.5)
            },
        );
        assert_eq!(direct.len(), split.len());
    }

    #[test]
    fn separate_runs_per_class() {
        let mut dets = boxes();
        dets[1].class_id = 1;
        let opts = NmsOptions {
            separate: true,
            ..union_opts(0.5)
        };
        let out = suppress(&dets, &opts);
        // The class-1 box no longer competes with the class-0 winner.
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn mean_shift_merges_a_tight_cluster() {
        let dets = vec![
            Detection::new(10.0, 10.0, 16.0, 16.0, 2.0),
            Detection::new(10.5, 10.5, 16.0, 16.0, 1.5),
            Detection::new(11.0, 10.0, 16.0, 16.0, 1.0),
            Detection::new(100.0, 100.0, 16.0, 16.0, 1.0),
        ];
        let opts = NmsOptions {
            kind: NmsKind::Ms,
            ..Default::default()
        };
        let out = suppress(&dets, &opts);
        assert_eq!(out.len(), 2);
        // The cluster mode carries the aggregate weight.
        assert!(out[0].score > 4.0);
        let (cx, _) = out[1].center();
        assert!((cx - 108.0).abs() < 1.0);
    }

    #[test]
    fn none_only_sorts() {
        let opts = NmsOptions {
            kind: NmsKind::None,
            ..Default::default()
        };
        let out = suppress(&boxes(), &opts);
        assert_eq!(out.len(), 4);
        assert!(out.windows(2).all(|p| p[0].score >= p[1].score));
    }
}
