//! Parameter types controlling feature pyramid construction.
use crate::channels::ChannelOptions;
use serde::{Deserialize, Serialize};

/// Options controlling the multi-scale channel pyramid.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PyramidOptions {
    pub channels: ChannelOptions,
    /// Scales per octave.
    pub n_per_oct: usize,
    /// Upsampled octaves computed above the original resolution.
    pub n_oct_up: usize,
    /// Approximated scales between exact ones; -1 selects `n_per_oct - 1`.
    pub n_approx: i32,
    /// Per-channel-type power-law exponents; estimated when empty.
    pub lambdas: Vec<f64>,
    /// Channel padding in source pixels (left/right, top/bottom).
    pub pad: (usize, usize),
    /// Smallest image size channels are computed for.
    pub min_ds: (usize, usize),
    /// Triangle radius applied to every finished channel plane.
    pub smooth: f64,
}

impl Default for PyramidOptions {
    fn default() -> Self {
        Self {
            channels: ChannelOptions::default(),
            n_per_oct: 8,
            n_oct_up: 0,
            n_approx: -1,
            lambdas: Vec::new(),
            pad: (0, 0),
            min_ds: (16, 16),
            smooth: 1.0,
        }
    }
}

impl PyramidOptions {
    /// Resolve derived defaults the way construction expects them:
    /// `n_approx = -1` becomes `n_per_oct - 1`, padding is rounded to a
    /// multiple of shrink, and `min_ds` is floored at `4 * shrink`.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        let shrink = self.channels.shrink;
        if out.n_approx < 0 {
            out.n_approx = self.n_per_oct.saturating_sub(1) as i32;
        }
        let round_to_shrink =
            |v: usize| ((v as f64 / shrink as f64).round() as usize) * shrink;
        out.pad = (round_to_shrink(self.pad.0), round_to_shrink(self.pad.1));
        out.min_ds = (
            self.min_ds.0.max(4 * shrink),
            self.min_ds.1.max(4 * shrink),
        );
        out
    }
}
