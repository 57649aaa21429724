//! Parameter types for single-scale channel computation.
use crate::channels::color::ColorSpace;
use crate::channels::gradient::GradMagOptions;
use crate::channels::hist::GradHistOptions;
use crate::error::{DetectorError, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorOptions {
    pub enabled: bool,
    /// Triangle radius applied to the converted image before any gradients.
    pub smooth: f64,
    pub color_space: ColorSpace,
}

impl Default for ColorOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            smooth: 1.0,
            color_space: ColorSpace::Luv,
        }
    }
}

/// Configuration for one `ChannelBank` computation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelOptions {
    /// Integer downsampling between the input image and the channel planes.
    pub shrink: usize,
    pub color: ColorOptions,
    pub grad_mag: GradMagOptions,
    pub grad_hist: GradHistOptions,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            shrink: 4,
            color: ColorOptions::default(),
            grad_mag: GradMagOptions::default(),
            grad_hist: GradHistOptions::default(),
        }
    }
}

impl ChannelOptions {
    /// Total plane count produced with the current configuration.
    pub fn total_planes(&self) -> usize {
        let mut n = 0;
        if self.color.enabled {
            n += self.color.color_space.output_planes();
        }
        if self.grad_mag.enabled {
            n += 1;
        }
        if self.grad_hist.enabled {
            let per_block = self.grad_hist.n_orients;
            n += if self.grad_hist.use_hog == 1 {
                4 * per_block
            } else {
                per_block
            };
        }
        n
    }

    pub fn validate(&self) -> Result<()> {
        if self.shrink == 0 {
            return Err(DetectorError::config("shrink must be at least 1"));
        }
        if self.grad_hist.enabled && self.grad_hist.n_orients == 0 {
            return Err(DetectorError::config("nOrients must be at least 1"));
        }
        if self.grad_hist.use_hog > 1 {
            return Err(DetectorError::config(
                "useHog=2 (FHOG) is not supported by this detector",
            ));
        }
        if self.total_planes() == 0 {
            return Err(DetectorError::config("no channel types enabled"));
        }
        Ok(())
    }
}
