//! Pyramid statistics and debug visualization.
use crate::image::{ImageF32, PlanarImage};
use crate::pyramid::Pyramid;
use serde::{Deserialize, Serialize};

/// Statistics for a single pyramid level.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PyramidLevelReport {
    pub level_index: usize,
    pub width: usize,
    pub height: usize,
    pub n_planes: usize,
    pub scale: f64,
    pub mean_value: f32,
}

/// Pyramid construction details captured by the detector or demo utilities.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PyramidStage {
    pub elapsed_ms: f64,
    pub n_types: usize,
    pub lambdas: Vec<f64>,
    pub levels: Vec<PyramidLevelReport>,
}

impl PyramidStage {
    pub fn from_pyramid(pyramid: &Pyramid, elapsed_ms: f64) -> Self {
        let levels = pyramid
            .levels
            .iter()
            .enumerate()
            .map(|(i, bank)| {
                let data = &bank.data.data;
                let denom = data.len().max(1) as f32;
                PyramidLevelReport {
                    level_index: i,
                    width: bank.width(),
                    height: bank.height(),
                    n_planes: bank.n_planes(),
                    scale: pyramid.scales[i],
                    mean_value: data.iter().sum::<f32>() / denom,
                }
            })
            .collect();
        Self {
            elapsed_ms,
            n_types: pyramid.n_types,
            lambdas: pyramid.lambdas.clone(),
            levels,
        }
    }
}

/// Render a pyramid as one grayscale canvas: each level's channel planes are
/// concatenated vertically, levels are concatenated horizontally with tops
/// aligned, and shorter columns are zero-padded. Values are min-max
/// normalized into [0, 1] for viewing.
pub fn render_pyramid(pyramid: &Pyramid) -> ImageF32 {
    render_banks(pyramid.levels.iter().map(|b| &b.data))
}

fn render_banks<'a, I: Iterator<Item = &'a PlanarImage<f32>>>(banks: I) -> ImageF32 {
    let banks: Vec<&PlanarImage<f32>> = banks.collect();
    let width: usize = banks.iter().map(|b| b.w).sum();
    let height: usize = banks
        .iter()
        .map(|b| b.h * b.n_planes)
        .max()
        .unwrap_or(0);
    let mut canvas = ImageF32::new(width, height);
    if width == 0 || height == 0 {
        return canvas;
    }

    let mut x0 = 0usize;
    for bank in &banks {
        for p in 0..bank.n_planes {
            for y in 0..bank.h {
                for x in 0..bank.w {
                    canvas.set(x0 + x, p * bank.h + y, bank.get(p, x, y));
                }
            }
        }
        x0 += bank.w;
    }

    let (mut lo, mut hi) = (f32::MAX, f32::MIN);
    for &v in &canvas.data {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if hi > lo {
        let inv = 1.0 / (hi - lo);
        for v in &mut canvas.data {
            *v = (*v - lo) * inv;
        }
    }
    canvas
}
