//! Multi-scale channel feature pyramid.
//!
//! Overview
//! - The scale schedule places `n_per_oct` levels per octave, nudged so the
//!   resized image dimensions divide the shrink factor exactly.
//! - Channels are computed exactly every `n_approx + 1` levels; the remaining
//!   levels are reconstructed from the nearest exact level by resampling each
//!   channel type and applying a per-type power law `(s/s_ref)^(-lambda)`.
//! - Per-type lambdas are estimated once from two exact scales when the model
//!   does not supply them, then fixed for the pyramid.
//! - Approximate levels have no inter-level dependencies and are distributed
//!   across the worker pool in shuffled order so the geometric size
//!   distribution does not starve threads.
pub(crate) mod build;
pub mod options;
pub mod scales;

pub use build::build_pyramid;
pub use options::PyramidOptions;

use crate::channels::{ChannelBank, ChannelInfo};
use crate::types::Rect;

/// A computed feature pyramid: one concatenated channel bank per scale,
/// sorted by decreasing resolution.
#[derive(Clone, Debug)]
pub struct Pyramid<T = f32> {
    pub levels: Vec<ChannelBank<T>>,
    /// Approximate scale factor applied to the source to obtain each level.
    pub scales: Vec<f64>,
    /// Exact per-axis (width, height) resampling factors.
    pub scaleshw: Vec<(f64, f64)>,
    /// Per-channel-type metadata, shared by all levels.
    pub info: Vec<ChannelInfo>,
    /// Power-law exponents actually used for approximation.
    pub lambdas: Vec<f64>,
    pub n_types: usize,
    /// Tile of each channel type within a level's packed stack; only filled
    /// by the tiled (accelerated) channel stage, empty on the CPU path.
    pub rois: Vec<Vec<Rect>>,
    /// Exact parameters used (normalized from the caller's options).
    pub opts: PyramidOptions,
}

impl<T> Pyramid<T> {
    pub fn n_scales(&self) -> usize {
        self.levels.len()
    }

    /// An empty pyramid for inputs below the minimum size.
    pub fn empty(opts: PyramidOptions) -> Self {
        Self {
            levels: Vec::new(),
            scales: Vec::new(),
            scaleshw: Vec::new(),
            info: Vec::new(),
            lambdas: Vec::new(),
            n_types: 0,
            rois: Vec::new(),
            opts,
        }
    }
}
