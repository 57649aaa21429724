//! Detector orchestrating the full multi-scale pipeline.
//!
//! Overview
//! - Normalizes the input into a planar float stack and builds the channel
//!   feature pyramid.
//! - Scans every pyramid level with the boosted cascade, distributing levels
//!   across the worker pool in shuffled order.
//! - Projects window hits back to source coordinates and runs non-maximum
//!   suppression.
//!
//! The model is immutable after load except through [`Detector::modify`].
//! Per-worker scratch (the `cids` offset tables) is allocated lazily under a
//! single mutex keyed by worker identity; nothing else locks in the hot path.
pub mod modify;
pub mod worker_cache;

pub use modify::ModifyOptions;

use crate::cascade::{scan_bank, ChannelSample, Model, ScanLayout, WindowHit};
use crate::channels::{compute_channels, ChannelBank};
use crate::error::{DetectorError, Result};
use crate::image::{PlanarImage, RgbU8};
use crate::nms::suppress;
use crate::pyramid::build::shuffled;
use crate::pyramid::{build_pyramid, Pyramid};
use crate::types::Detection;
use log::debug;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use worker_cache::LazyWorkerMap;

/// Per-worker cache of `cids` tables keyed by bank layout and storage order.
type CidsScratch = HashMap<(usize, usize, usize, bool), Arc<Vec<u32>>>;

pub struct Detector {
    model: Model,
    /// Channel stacks stored transposed (column-major legacy training).
    transposed: bool,
    /// Input planes already carry scaled LUV data.
    pre_luv: bool,
    do_nms: bool,
    parallel: bool,
    /// Drop detections scoring below this fraction of the frame's best.
    score_prune_ratio: f32,
    scratch: LazyWorkerMap<CidsScratch>,
}

impl Detector {
    /// Take ownership of a model, validating and finalizing it.
    pub fn new(mut model: Model) -> Result<Self> {
        model.finalize()?;
        Ok(Self {
            model,
            transposed: false,
            pre_luv: false,
            do_nms: true,
            parallel: cfg!(feature = "parallel"),
            score_prune_ratio: 0.0,
            scratch: LazyWorkerMap::new(),
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| DetectorError::config(format!("cannot open model {}: {e}", path.display())))?;
        Self::new(Model::from_json_reader(std::io::BufReader::new(file))?)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Object window size (w, h) in source pixels.
    pub fn window_size(&self) -> (usize, usize) {
        self.model.opts.model_ds
    }

    pub fn set_transposed(&mut self, flag: bool) {
        self.transposed = flag;
    }

    pub fn is_transposed(&self) -> bool {
        self.transposed
    }

    pub fn set_pre_luv(&mut self, flag: bool) {
        self.pre_luv = flag;
    }

    pub fn set_do_nms(&mut self, flag: bool) {
        self.do_nms = flag;
    }

    pub fn set_parallel(&mut self, flag: bool) {
        self.parallel = flag;
    }

    pub fn set_score_prune_ratio(&mut self, ratio: f32) {
        self.score_prune_ratio = ratio;
    }

    /// Apply the permitted runtime modifications to the loaded model.
    pub fn modify(&mut self, m: &ModifyOptions) -> Result<()> {
        m.validate()?;
        let opts = &mut self.model.opts;
        let pyr = &mut opts.pyramid;
        if let Some(v) = m.n_per_oct {
            pyr.n_per_oct = v;
        }
        if let Some(v) = m.n_oct_up {
            pyr.n_oct_up = v;
        }
        if let Some(v) = m.n_approx {
            pyr.n_approx = v;
        }
        if let Some(v) = &m.lambdas {
            pyr.lambdas = v.clone();
        }
        if let Some(v) = m.pad {
            pyr.pad = v;
        }
        if let Some(v) = m.min_ds {
            pyr.min_ds = v;
        }
        if let Some(v) = &m.nms {
            opts.nms = v.clone();
        }
        if let Some(v) = m.stride {
            let shrink = pyr.channels.shrink;
            opts.stride =
                ((v as f64 / shrink as f64).round() as usize).max(1) * shrink;
        }
        if let Some(v) = m.casc_thr {
            opts.casc_thr = v;
        }
        if let Some(v) = m.casc_cal {
            self.model.clf.calibrate(v);
        }
        Ok(())
    }

    fn scan_layout(&self) -> ScanLayout {
        ScanLayout {
            shrink: self.model.opts.pyramid.channels.shrink,
            model_ds_pad: self.model.opts.model_ds_pad,
            stride: self.model.opts.stride,
            transposed: self.transposed,
        }
    }

    /// Build the channel pyramid for a planar input.
    pub fn compute_pyramid(&self, input: &PlanarImage<f32>) -> Result<Pyramid> {
        build_pyramid(input, &self.model.opts.pyramid, self.pre_luv, self.parallel)
    }

    /// Detect on an interleaved 8-bit color view.
    pub fn detect_rgb(&self, img: &RgbU8<'_>) -> Result<Vec<Detection>> {
        let planar = crate::channels::color::planar_from_rgb8(img);
        self.detect_planar(&planar)
    }

    /// Detect on a planar float image in [0, 1].
    ///
    /// Inputs smaller than `4 * shrink` in either dimension yield zero
    /// detections rather than an error.
    pub fn detect_planar(&self, input: &PlanarImage<f32>) -> Result<Vec<Detection>> {
        let shrink = self.model.opts.pyramid.channels.shrink;
        if input.w < 4 * shrink || input.h < 4 * shrink {
            debug!("input {}x{} below 4*shrink, zero detections", input.w, input.h);
            return Ok(Vec::new());
        }
        let pyramid = self.compute_pyramid(input)?;
        Ok(self.detect_pyramid(&pyramid))
    }

    /// Scan an already computed pyramid (float or u8 banks).
    pub fn detect_pyramid<T: ChannelSample>(&self, pyramid: &Pyramid<T>) -> Vec<Detection> {
        let layout = self.scan_layout();
        let casc_thr = self.model.opts.casc_thr;

        let order = shuffled((0..pyramid.n_scales()).collect());
        let per_level = run_levels(&order, self.parallel, |i| {
            let bank = &pyramid.levels[i];
            let hits = scan_bank(
                &bank.data,
                &self.model.clf,
                &layout,
                casc_thr,
                &self.cids_for(bank),
            );
            self.project_hits(&hits, pyramid, i)
        });

        let mut detections: Vec<Detection> = per_level.into_iter().flatten().collect();
        if self.do_nms {
            detections = suppress(&detections, &self.model.opts.nms);
        } else {
            detections.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        self.prune(&mut detections);
        detections
    }

    /// Score one model-window-sized image the way the detect path would,
    /// with early rejection disabled.
    pub fn evaluate(&self, input: &PlanarImage<f32>) -> Result<f32> {
        let opts = &self.model.opts.pyramid;
        let set = compute_channels(input, &opts.channels, self.pre_luv)?;
        let mut set = set;
        for stack in set.types.iter_mut() {
            if opts.smooth > 0.0 {
                crate::channels::smooth::conv_tri_planar(stack, opts.smooth);
            }
        }
        let bank = set.concat();
        let layout = self.scan_layout();
        let (mw, mh) = layout.model_dims_ch();
        let (bw, bh) = if self.transposed {
            (bank.height(), bank.width())
        } else {
            (bank.width(), bank.height())
        };
        if bw < mw || bh < mh {
            return Err(DetectorError::input(format!(
                "evaluate needs at least a {mw}x{mh}-cell window, got {bw}x{bh}"
            )));
        }
        Ok(crate::cascade::evaluate_window(
            &bank.data,
            &self.model.clf,
            &layout,
        ))
    }

    fn cids_for<T>(&self, bank: &ChannelBank<T>) -> Arc<Vec<u32>> {
        let key = (
            bank.data.row_stride,
            bank.data.plane_stride,
            bank.data.n_planes,
            self.transposed,
        );
        let scratch = self.scratch.local();
        let mut guard = scratch.lock().expect("worker scratch poisoned");
        guard
            .entry(key)
            .or_insert_with(|| Arc::new(self.scan_layout().cids(&bank.data)))
            .clone()
    }

    /// Map window hits of one level back to source-image coordinates.
    fn project_hits<T>(
        &self,
        hits: &[WindowHit],
        pyramid: &Pyramid<T>,
        level: usize,
    ) -> Vec<Detection> {
        let opts = &self.model.opts;
        let (model_w, model_h) = opts.model_ds;
        let (pad_w, pad_h) = opts.model_ds_pad;
        let pyr_pad = pyramid.opts.pad;
        let shift_x = (pad_w as f64 - model_w as f64) / 2.0 - pyr_pad.0 as f64;
        let shift_y = (pad_h as f64 - model_h as f64) / 2.0 - pyr_pad.1 as f64;
        let (sw, sh) = pyramid.scaleshw[level];
        let scale = pyramid.scales[level];
        let stride = opts.stride as f64;

        hits.iter()
            .map(|hit| {
                Detection::new(
                    ((hit.col as f64 * stride + shift_x) / sw) as f32,
                    ((hit.row as f64 * stride + shift_y) / sh) as f32,
                    (model_w as f64 / scale) as f32,
                    (model_h as f64 / scale) as f32,
                    hit.score,
                )
            })
            .collect()
    }

    fn prune(&self, detections: &mut Vec<Detection>) {
        if self.score_prune_ratio <= 0.0 || detections.is_empty() {
            return;
        }
        let best = detections
            .iter()
            .map(|d| d.score)
            .fold(f32::NEG_INFINITY, f32::max);
        let cutoff = best * self.score_prune_ratio;
        detections.retain(|d| d.score >= cutoff);
    }
}

/// Keep only the highest-scoring detection.
pub fn choose_best(detections: &mut Vec<Detection>) {
    if detections.len() > 1 {
        let best = detections
            .iter()
            .copied()
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("non-empty");
        detections.clear();
        detections.push(best);
    }
}

#[cfg(feature = "parallel")]
fn run_levels<F>(order: &[usize], parallel: bool, f: F) -> Vec<Vec<Detection>>
where
    F: Fn(usize) -> Vec<Detection> + Sync,
{
    use rayon::prelude::*;
    if parallel {
        order.par_iter().map(|&i| f(i)).collect()
    } else {
        order.iter().map(|&i| f(i)).collect()
    }
}

#[cfg(not(feature = "parallel"))]
fn run_levels<F>(order: &[usize], _parallel: bool, f: F) -> Vec<Vec<Detection>>
where
    F: Fn(usize) -> Vec<Detection>,
{
    order.iter().map(|&i| f(i)).collect()
}
