//! Structured, serializable reports for tools and demo binaries.
pub mod pyramid;

pub use pyramid::{render_pyramid, PyramidLevelReport, PyramidStage};

use crate::detector::Detector;
use crate::error::Result;
use crate::image::PlanarImage;
use crate::types::Detection;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Input image descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDescriptor {
    pub width: usize,
    pub height: usize,
    pub planes: usize,
}

/// End-to-end detection diagnostics for one image.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub input: InputDescriptor,
    pub pyramid: PyramidStage,
    /// Cascade scan plus suppression, milliseconds.
    pub detect_ms: f64,
    pub total_ms: f64,
    pub detections: Vec<Detection>,
}

/// Run detection on a planar image, capturing per-stage timings.
pub fn run_with_report(detector: &Detector, input: &PlanarImage<f32>) -> Result<DetectionReport> {
    let total_start = Instant::now();

    let pyr_start = Instant::now();
    let pyramid = detector.compute_pyramid(input)?;
    let pyramid_ms = pyr_start.elapsed().as_secs_f64() * 1000.0;

    let detect_start = Instant::now();
    let detections = detector.detect_pyramid(&pyramid);
    let detect_ms = detect_start.elapsed().as_secs_f64() * 1000.0;

    Ok(DetectionReport {
        input: InputDescriptor {
            width: input.w,
            height: input.h,
            planes: input.n_planes,
        },
        pyramid: PyramidStage::from_pyramid(&pyramid, pyramid_ms),
        detect_ms,
        total_ms: total_start.elapsed().as_secs_f64() * 1000.0,
        detections,
    })
}
