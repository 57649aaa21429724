//! Dense sliding-window cascade evaluation.
//!
//! Feature lookups are table-driven: `cids[fid]` turns a trained feature
//! index into a direct offset into the packed channel stack, so the inner
//! loop is one add and one load per node. The tree walk is monomorphized per
//! tree depth so the step count is a compile-time constant; depth 0 falls
//! back to the explicit `child[]` table for variable-depth trees.
//!
//! Feature indices enumerate the model window plane-by-plane in column-major
//! order (plane, column, row), matching the layout the cascades are trained
//! with. The `transposed` flag selects the legacy column-major storage, in
//! which case window coordinates come back already swapped to image
//! orientation.
use super::model::Classifier;
use crate::image::PlanarImage;

/// Sample types the cascade can read directly from a channel stack.
pub trait ChannelSample: Copy + Send + Sync + 'static {
    fn thresholds(clf: &Classifier) -> &[Self];
    fn below(self, thr: Self) -> bool;
}

impl ChannelSample for f32 {
    #[inline]
    fn thresholds(clf: &Classifier) -> &[f32] {
        &clf.thrs
    }
    #[inline]
    fn below(self, thr: f32) -> bool {
        self < thr
    }
}

impl ChannelSample for u8 {
    #[inline]
    fn thresholds(clf: &Classifier) -> &[u8] {
        &clf.thrs_u8
    }
    #[inline]
    fn below(self, thr: u8) -> bool {
        self < thr
    }
}

/// Precomputed channel offsets for one (model window, layout, shrink) tuple.
///
/// `fid` enumeration order is (plane, column, row); the returned table maps
/// each fid to a single offset from a window's base sample.
pub fn compute_cids(
    n_planes: usize,
    plane_stride: usize,
    row_stride: usize,
    model_w_ch: usize,
    model_h_ch: usize,
    transposed: bool,
) -> Vec<u32> {
    let mut cids = Vec::with_capacity(n_planes * model_w_ch * model_h_ch);
    for z in 0..n_planes {
        for c in 0..model_w_ch {
            for r in 0..model_h_ch {
                let off = if transposed {
                    z * plane_stride + c * row_stride + r
                } else {
                    z * plane_stride + r * row_stride + c
                };
                cids.push(off as u32);
            }
        }
    }
    cids
}

#[inline]
fn eval_window<T: ChannelSample, const D: usize>(
    data: &[T],
    base: usize,
    clf: &Classifier,
    thrs: &[T],
    cids: &[u32],
    casc_thr: f32,
) -> f32 {
    let mut h = 0.0f32;
    for t in 0..clf.n_trees {
        let offset = t * clf.n_tree_nodes;
        let mut k0 = 0usize;
        if D == 0 {
            let mut k = offset;
            while clf.child[k] != 0 {
                let ftr = data[base + cids[clf.fids[k] as usize] as usize];
                let left = clf.child[k] as usize;
                k0 = if ftr.below(thrs[k]) { left } else { left + 1 };
                k = offset + k0;
            }
            h += clf.hs[k];
        } else {
            for _ in 0..D {
                let k = offset + k0;
                let ftr = data[base + cids[clf.fids[k] as usize] as usize];
                k0 = 2 * k0 + if ftr.below(thrs[k]) { 1 } else { 2 };
            }
            h += clf.hs[offset + k0];
        }
        if h <= casc_thr {
            break;
        }
    }
    h
}

type EvalFn<T> = fn(&[T], usize, &Classifier, &[T], &[u32], f32) -> f32;

/// Dispatch table mapping the loaded model's depth to its specialized
/// evaluator.
pub fn evaluator_for<T: ChannelSample>(depth: usize) -> EvalFn<T> {
    match depth {
        0 => eval_window::<T, 0>,
        1 => eval_window::<T, 1>,
        2 => eval_window::<T, 2>,
        3 => eval_window::<T, 3>,
        4 => eval_window::<T, 4>,
        5 => eval_window::<T, 5>,
        6 => eval_window::<T, 6>,
        7 => eval_window::<T, 7>,
        8 => eval_window::<T, 8>,
        _ => unreachable!("validated at model load"),
    }
}

/// A window whose cumulative score cleared the cascade threshold.
#[derive(Clone, Copy, Debug)]
pub struct WindowHit {
    /// Window column in image orientation (multiply by stride for pixels).
    pub col: usize,
    /// Window row in image orientation.
    pub row: usize,
    pub score: f32,
}

/// Scan geometry shared by every window of one pyramid level.
#[derive(Clone, Copy, Debug)]
pub struct ScanLayout {
    pub shrink: usize,
    /// Padded model window (w, h) in source pixels, image orientation.
    pub model_ds_pad: (usize, usize),
    /// Window stride in source pixels (multiple of shrink).
    pub stride: usize,
    /// Channel stacks stored transposed (column-major legacy).
    pub transposed: bool,
}

impl ScanLayout {
    /// Model window size in channel cells, image orientation.
    pub fn model_dims_ch(&self) -> (usize, usize) {
        (
            self.model_ds_pad.0 / self.shrink,
            self.model_ds_pad.1 / self.shrink,
        )
    }

    /// Number of valid window positions over a bank of the given stored size.
    pub fn grid<T>(&self, bank: &PlanarImage<T>) -> (usize, usize) {
        let (img_w_ch, img_h_ch) = if self.transposed {
            (bank.h, bank.w)
        } else {
            (bank.w, bank.h)
        };
        let fit = |img_ch: usize, model_px: usize| -> usize {
            let span = img_ch * self.shrink;
            if span < model_px {
                0
            } else {
                (span - model_px + self.stride) / self.stride
            }
        };
        (
            fit(img_w_ch, self.model_ds_pad.0),
            fit(img_h_ch, self.model_ds_pad.1),
        )
    }

    /// Offset lookup table for this layout over the given bank.
    pub fn cids<T>(&self, bank: &PlanarImage<T>) -> Vec<u32> {
        let (mw, mh) = self.model_dims_ch();
        compute_cids(
            bank.n_planes,
            bank.plane_stride,
            bank.row_stride,
            mw,
            mh,
            self.transposed,
        )
    }
}

/// Evaluate every window position of one channel bank, emitting the windows
/// whose final score exceeds `casc_thr`.
pub fn scan_bank<T: ChannelSample>(
    bank: &PlanarImage<T>,
    clf: &Classifier,
    layout: &ScanLayout,
    casc_thr: f32,
    cids: &[u32],
) -> Vec<WindowHit> {
    let (n_cols, n_rows) = layout.grid(bank);
    if n_cols == 0 || n_rows == 0 {
        return Vec::new();
    }
    let step = layout.stride / layout.shrink;
    let eval = evaluator_for::<T>(clf.tree_depth);
    let thrs = T::thresholds(clf);
    let rs = bank.row_stride;

    let mut hits = Vec::new();
    for c in 0..n_cols {
        for r in 0..n_rows {
            let base = if layout.transposed {
                (c * step) * rs + r * step
            } else {
                (r * step) * rs + c * step
            };
            let h = eval(&bank.data, base, clf, thrs, cids, casc_thr);
            if h > casc_thr {
                hits.push(WindowHit { col: c, row: r, score: h });
            }
        }
    }
    hits
}

/// Score the single window anchored at (0, 0) with early rejection disabled.
pub fn evaluate_window<T: ChannelSample>(
    bank: &PlanarImage<T>,
    clf: &Classifier,
    layout: &ScanLayout,
) -> f32 {
    let cids = layout.cids(bank);
    let eval = evaluator_for::<T>(clf.tree_depth);
    eval(
        &bank.data,
        0,
        clf,
        T::thresholds(clf),
        &cids,
        f32::NEG_INFINITY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ScanLayout {
        ScanLayout {
            shrink: 1,
            model_ds_pad: (2, 2),
            stride: 1,
            transposed: false,
        }
    }

    /// Single depth-2 tree reading features 0 and 3 of a 2×2 window.
    fn depth2_classifier() -> Classifier {
        let mut clf = Classifier {
            n_trees: 1,
            n_tree_nodes: 7,
            fids: vec![0, 3, 3, 0, 0, 0, 0],
            thrs: vec![0.5, 0.25, 0.75, 0.0, 0.0, 0.0, 0.0],
            child: Vec::new(),
            hs: vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0],
            depth: Vec::new(),
            tree_depth: 2,
            thrs_u8: Vec::new(),
        };
        clf.prepare();
        clf
    }

    /// Minimal variable-depth tree: root with one split, left child is a
    /// leaf, right child splits again.
    fn variable_depth_classifier() -> Classifier {
        let mut clf = Classifier {
            n_trees: 1,
            n_tree_nodes: 5,
            fids: vec![0, 0, 2, 0, 0],
            thrs: vec![0.5, 0.0, 0.5, 0.0, 0.0],
            child: vec![1, 0, 3, 0, 0],
            hs: vec![0.0, -1.0, 0.0, 2.0, 3.0],
            depth: Vec::new(),
            tree_depth: 0,
            thrs_u8: Vec::new(),
        };
        clf.prepare();
        clf
    }

    fn bank_2x2(values: [f32; 4]) -> PlanarImage<f32> {
        let mut bank = PlanarImage::new(2, 2, 1);
        bank.data.copy_from_slice(&values);
        bank
    }

    #[test]
    fn cids_row_major_addressing() {
        let cids = compute_cids(2, 12, 4, 3, 2, false);
        // fid order is (plane, column, row): fid 1 = plane 0, col 0, row 1.
        assert_eq!(cids[0], 0);
        assert_eq!(cids[1], 4);
        assert_eq!(cids[2], 1);
        // First fid of plane 1.
        assert_eq!(cids[6], 12);
    }

    #[test]
    fn cids_transposed_addressing() {
        let cids = compute_cids(1, 12, 4, 3, 2, true);
        // Transposed storage: (col, row) maps to col * row_stride + row.
        assert_eq!(cids[0], 0);
        assert_eq!(cids[1], 1);
        assert_eq!(cids[2], 4);
    }

    #[test]
    fn depth2_walk_reaches_expected_leaf() {
        let clf = depth2_classifier();
        // Feature 0 = 0.8 (right), feature 3 = 0.6 (left) → leaf 5.
        let bank = bank_2x2([0.8, 0.0, 0.0, 0.6]);
        let layout = layout();
        let score = evaluate_window(&bank, &clf, &layout);
        assert_eq!(score, 3.0);

        let bank = bank_2x2([0.2, 0.0, 0.0, 0.1]);
        assert_eq!(evaluate_window(&bank, &clf, &layout), 1.0);
    }

    #[test]
    fn three_node_stump_with_child_table() {
        let mut clf = Classifier {
            n_trees: 1,
            n_tree_nodes: 3,
            fids: vec![0, 0, 0],
            thrs: vec![0.5, 0.0, 0.0],
            child: vec![1, 0, 0],
            hs: vec![0.0, -1.0, 1.0],
            depth: Vec::new(),
            tree_depth: 0,
            thrs_u8: Vec::new(),
        };
        clf.prepare();
        let layout = layout();
        assert_eq!(evaluate_window(&bank_2x2([0.4, 0.0, 0.0, 0.0]), &clf, &layout), -1.0);
        assert_eq!(evaluate_window(&bank_2x2([0.6, 0.0, 0.0, 0.0]), &clf, &layout), 1.0);
    }

    #[test]
    fn variable_depth_walk_uses_child_table() {
        let clf = variable_depth_classifier();
        let layout = layout();
        // Left branch terminates immediately.
        assert_eq!(evaluate_window(&bank_2x2([0.2, 0.0, 0.0, 0.0]), &clf, &layout), -1.0);
        // Right branch splits on a second feature.
        assert_eq!(evaluate_window(&bank_2x2([0.8, 0.2, 0.0, 0.0]), &clf, &layout), 2.0);
        assert_eq!(evaluate_window(&bank_2x2([0.8, 0.9, 0.0, 0.0]), &clf, &layout), 3.0);
    }

    #[test]
    fn u8_path_matches_float_path() {
        let clf = depth2_classifier();
        let layout = layout();
        let f_bank = bank_2x2([0.8, 0.1, 0.3, 0.6]);
        let mut u_bank: PlanarImage<u8> = PlanarImage::new(2, 2, 1);
        for (dst, &src) in u_bank.data.iter_mut().zip(&f_bank.data) {
            *dst = (src * 255.0).round() as u8;
        }
        let f_score = evaluate_window(&f_bank, &clf, &layout);
        let u_score = evaluate_window(&u_bank, &clf, &layout);
        assert_eq!(f_score, u_score);
    }

    #[test]
    fn scan_covers_all_positions() {
        let clf = depth2_classifier();
        let layout = ScanLayout {
            shrink: 1,
            model_ds_pad: (2, 2),
            stride: 1,
            transposed: false,
        };
        let mut bank = PlanarImage::new(4, 3, 1);
        for v in bank.data.iter_mut() {
            *v = 1.0;
        }
        let cids = layout.cids(&bank);
        let hits = scan_bank(&bank, &clf, &layout, f32::NEG_INFINITY, &cids);
        // 3 columns × 2 rows of valid 2×2 windows.
        assert_eq!(hits.len(), 6);
    }

    #[test]
    fn early_reject_is_monotone_in_threshold() {
        let clf = depth2_classifier();
        let layout = layout();
        let bank = bank_2x2([0.8, 0.1, 0.3, 0.6]);
        let cids = layout.cids(&bank);
        let loose = scan_bank(&bank, &clf, &layout, 0.0, &cids);
        let tight = scan_bank(&bank, &clf, &layout, 2.5, &cids);
        assert!(tight.len() <= loose.len());
        for hit in &tight {
            assert!(loose
                .iter()
                .any(|h| h.col == hit.col && h.row == hit.row && h.score == hit.score));
        }
    }
}
