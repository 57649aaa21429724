#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod detector;
pub mod diagnostics;
pub mod error;
pub mod image;
pub mod types;

// “Expert” modules – still public, but considered unstable internals.
pub mod cascade;
pub mod channels;
pub mod gpu;
pub mod nms;
pub mod pipeline;
pub mod pyramid;

// --- High-level re-exports -------------------------------------------------

// Main entry points: detector + results.
pub use crate::cascade::{Classifier, Model, ModelOptions};
pub use crate::detector::{Detector, ModifyOptions};
pub use crate::error::DetectorError;
pub use crate::types::Detection;

// The frame pipeline for streaming input.
pub use crate::pipeline::{DetectionPipeline, PipelineOutput};

// High-level diagnostics.
pub use crate::diagnostics::DetectionReport;

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use acf_detector::prelude::*;
///
/// # fn main() -> Result<(), acf_detector::DetectorError> {
/// let detector = Detector::from_json_file(std::path::Path::new("model.json"))?;
/// let (w, h) = (640usize, 480usize);
/// let rgb = vec![0u8; w * h * 3];
/// let dets = detector.detect_rgb(&RgbU8::new(w, h, 3, &rgb))?;
/// println!("found {} objects", dets.len());
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::image::{ImageU8, RgbU8};
    pub use crate::{Detection, DetectionPipeline, Detector, Model};
}
