//! Runtime model modification.
//!
//! Trained models must never be edited field-by-field; the fields collected
//! here are the only ones that may change after load. Scale-schedule fields
//! feed straight into the pyramid options, `cascCal` is folded into the leaf
//! scores, and the stride is re-rounded to a shrink multiple.
use crate::error::{DetectorError, Result};
use crate::nms::NmsOptions;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModifyOptions {
    pub n_per_oct: Option<usize>,
    pub n_oct_up: Option<usize>,
    pub n_approx: Option<i32>,
    pub lambdas: Option<Vec<f64>>,
    pub pad: Option<(usize, usize)>,
    pub min_ds: Option<(usize, usize)>,
    pub nms: Option<NmsOptions>,
    pub stride: Option<usize>,
    pub casc_thr: Option<f32>,
    pub casc_cal: Option<f32>,
    pub rescale: Option<f64>,
}

impl ModifyOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.n_per_oct {
            if n == 0 {
                return Err(DetectorError::config("nPerOct must be positive"));
            }
        }
        if let Some(r) = self.rescale {
            if r != 1.0 {
                return Err(DetectorError::config(
                    "detector rescaling is not supported; retrain at the target window size",
                ));
            }
        }
        Ok(())
    }
}
