//! In-memory boosted-tree cascade model.
//!
//! Trees are stored as parallel arrays of length `n_trees * n_tree_nodes`.
//! A fixed `tree_depth` in 1..=8 means every tree is a full binary tree of
//! that depth with implicit child indexing (children of node `n` are `2n+1`
//! and `2n+2`). `tree_depth == 0` selects the variable-depth encoding, where
//! `child[n]` holds the within-tree index of the left child and 0 marks a
//! leaf.
use crate::error::{DetectorError, Result};
use crate::nms::NmsOptions;
use crate::pyramid::PyramidOptions;
use serde::{Deserialize, Serialize};

pub const MAX_TREE_DEPTH: usize = 8;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classifier {
    pub n_trees: usize,
    pub n_tree_nodes: usize,
    /// Feature index into the flattened model window, per node.
    pub fids: Vec<u32>,
    /// Split threshold per node.
    pub thrs: Vec<f32>,
    /// Left-child index per node (variable-depth encoding; 0 = leaf).
    pub child: Vec<u32>,
    /// Score contribution per node; read at leaves.
    pub hs: Vec<f32>,
    /// Node depths, informational.
    #[serde(default)]
    pub depth: Vec<u32>,
    /// Depth of all leaves, or 0 for the variable-depth encoding.
    pub tree_depth: usize,
    /// Thresholds pre-scaled for u8 channel stacks; derived, not serialized.
    #[serde(skip)]
    pub thrs_u8: Vec<u8>,
}

impl Classifier {
    #[inline]
    pub fn node(&self, tree: usize, node: usize) -> usize {
        tree * self.n_tree_nodes + node
    }

    /// Structural validation of the parallel arrays.
    pub fn validate(&self) -> Result<()> {
        let n = self.n_trees * self.n_tree_nodes;
        if self.n_trees == 0 || self.n_tree_nodes == 0 {
            return Err(DetectorError::config("classifier has no trees"));
        }
        for (name, len) in [
            ("fids", self.fids.len()),
            ("thrs", self.thrs.len()),
            ("hs", self.hs.len()),
        ] {
            if len != n {
                return Err(DetectorError::config(format!(
                    "classifier table '{name}' has {len} entries, expected {n}"
                )));
            }
        }
        if self.tree_depth > MAX_TREE_DEPTH {
            return Err(DetectorError::config(format!(
                "tree depth {} exceeds the supported maximum of {MAX_TREE_DEPTH}",
                self.tree_depth
            )));
        }
        if self.tree_depth > 0 {
            let full = (1usize << (self.tree_depth + 1)) - 1;
            if self.n_tree_nodes != full {
                return Err(DetectorError::config(format!(
                    "depth-{} trees need {full} nodes, got {}",
                    self.tree_depth, self.n_tree_nodes
                )));
            }
        } else {
            if self.child.len() != n {
                return Err(DetectorError::config(format!(
                    "variable-depth classifier needs a child table of {n} entries, got {}",
                    self.child.len()
                )));
            }
            for (i, &c) in self.child.iter().enumerate() {
                if c as usize + 1 >= self.n_tree_nodes && c != 0 {
                    return Err(DetectorError::config(format!(
                        "child index {c} at node {i} exceeds tree size"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Derive the u8-scaled threshold table (round to nearest, ties to even).
    pub fn prepare(&mut self) {
        self.thrs_u8 = self
            .thrs
            .iter()
            .map(|&t| (t * 255.0).round_ties_even().clamp(0.0, 255.0) as u8)
            .collect();
    }

    /// Shift every score entry; used for runtime calibration.
    pub fn calibrate(&mut self, delta: f32) {
        for h in &mut self.hs {
            *h += delta;
        }
    }

    /// Largest feature index referenced by any node.
    pub fn max_fid(&self) -> u32 {
        self.fids.iter().copied().max().unwrap_or(0)
    }
}

/// Detector options carried alongside the classifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelOptions {
    pub pyramid: PyramidOptions,
    /// Object window size (w, h) in source pixels.
    pub model_ds: (usize, usize),
    /// Padded window actually scanned by the cascade.
    pub model_ds_pad: (usize, usize),
    pub nms: NmsOptions,
    /// Window stride in source pixels.
    pub stride: usize,
    /// Early-reject threshold on the cumulative score.
    pub casc_thr: f32,
    /// Additive calibration applied on top of `casc_thr` handling.
    pub casc_cal: f32,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            pyramid: PyramidOptions::default(),
            model_ds: (41, 100),
            model_ds_pad: (64, 128),
            nms: NmsOptions::default(),
            stride: 4,
            casc_thr: -1.0,
            casc_cal: 0.0,
        }
    }
}

/// The in-memory model contract: options plus the parallel-array cascade.
/// Immutable after load except through `Detector::modify`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    pub opts: ModelOptions,
    pub clf: Classifier,
}

impl Model {
    /// Validate, normalize derived fields, and prepare lookup tables.
    ///
    /// The padded window is rounded down to a shrink multiple, the pyramid
    /// pad defaults to half the window padding, `min_ds` is anchored at the
    /// object window, and the stride is forced to a positive shrink multiple.
    pub fn finalize(&mut self) -> Result<()> {
        self.clf.validate()?;
        self.opts.pyramid.channels.validate()?;

        let shrink = self.opts.pyramid.channels.shrink;
        let (mw, mh) = self.opts.model_ds;
        if mw == 0 || mh == 0 {
            return Err(DetectorError::config("model window must be non-empty"));
        }
        let pad_w = (self.opts.model_ds_pad.0 / shrink) * shrink;
        let pad_h = (self.opts.model_ds_pad.1 / shrink) * shrink;
        if pad_w < mw || pad_h < mh {
            return Err(DetectorError::config(
                "padded model window must contain the object window",
            ));
        }
        self.opts.model_ds_pad = (pad_w, pad_h);

        if self.opts.pyramid.pad == (0, 0) {
            self.opts.pyramid.pad = (
                ((pad_w - mw) / shrink / 2) * shrink,
                ((pad_h - mh) / shrink / 2) * shrink,
            );
        }
        self.opts.pyramid.min_ds = self.opts.model_ds;

        self.opts.stride = ((self.opts.stride as f64 / shrink as f64).round() as usize)
            .max(1)
            * shrink;

        // Feature indices must stay inside the flattened model window.
        let window_features = (pad_w / shrink) * (pad_h / shrink)
            * self.opts.pyramid.channels.total_planes();
        if self.clf.max_fid() as usize >= window_features {
            return Err(DetectorError::config(format!(
                "feature index {} outside the {}-entry model window",
                self.clf.max_fid(),
                window_features
            )));
        }

        self.clf.prepare();
        if self.opts.casc_cal != 0.0 {
            self.clf.calibrate(self.opts.casc_cal);
            self.opts.casc_cal = 0.0;
        }
        Ok(())
    }

    /// Load a model from its JSON serialization and finalize it.
    pub fn from_json_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut model: Model = serde_json::from_reader(reader)
            .map_err(|e| DetectorError::config(format!("malformed model: {e}")))?;
        model.finalize()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn stump_classifier() -> Classifier {
        // One depth-1 tree: feature 0 against 0.5, scores ±1.
        Classifier {
            n_trees: 1,
            n_tree_nodes: 3,
            fids: vec![0, 0, 0],
            thrs: vec![0.5, 0.0, 0.0],
            child: Vec::new(),
            hs: vec![0.0, -1.0, 1.0],
            depth: Vec::new(),
            tree_depth: 1,
            thrs_u8: Vec::new(),
        }
    }

    #[test]
    fn validate_catches_shape_mismatch() {
        let mut clf = stump_classifier();
        assert!(clf.validate().is_ok());
        clf.thrs.pop();
        assert!(clf.validate().is_err());
    }

    #[test]
    fn depth_above_max_rejected() {
        let mut clf = stump_classifier();
        clf.tree_depth = 9;
        assert!(clf.validate().is_err());
    }

    #[test]
    fn u8_thresholds_round_ties_to_even() {
        let mut clf = stump_classifier();
        clf.thrs = vec![0.5 / 255.0, 1.5 / 255.0, 2.0];
        clf.prepare();
        // 0.5 → 0 and 1.5 → 2 under banker's rounding; large values clamp.
        assert_eq!(clf.thrs_u8, vec![0, 2, 255]);
    }

    #[test]
    fn finalize_rounds_stride_and_pad_window() {
        let mut model = Model {
            opts: ModelOptions {
                model_ds: (48, 48),
                model_ds_pad: (62, 66),
                stride: 5,
                ..Default::default()
            },
            clf: stump_classifier(),
        };
        model.finalize().unwrap();
        assert_eq!(model.opts.model_ds_pad, (60, 64));
        assert_eq!(model.opts.stride % 4, 0);
        assert_eq!(model.opts.pyramid.min_ds, (48, 48));
    }

    #[test]
    fn calibration_is_folded_into_scores() {
        let mut model = Model {
            opts: ModelOptions {
                model_ds: (48, 48),
                model_ds_pad: (64, 64),
                casc_cal: 0.25,
                ..Default::default()
            },
            clf: stump_classifier(),
        };
        model.finalize().unwrap();
        assert_eq!(model.opts.casc_cal, 0.0);
        assert!((model.clf.hs[1] - (-0.75)).abs() < 1e-6);
    }
}
