//! Channel computation: color, gradient magnitude, and oriented histograms
//! aggregated into a planar stack at 1/shrink resolution.
//!
//! `compute_channels` transforms one image scale into a [`ChannelSet`] whose
//! channel types are kept separate (the pyramid resamples them type by type);
//! [`ChannelSet::concat`] packs the types into a single [`ChannelBank`] with a
//! constant plane stride, which is the layout the cascade indexes into.
pub mod color;
pub mod gradient;
pub mod hist;
pub mod options;
pub mod resample;
pub mod smooth;

pub use color::ColorSpace;
pub use gradient::GradMagOptions;
pub use hist::GradHistOptions;
pub use options::{ChannelOptions, ColorOptions};

use crate::error::Result;
use crate::image::PlanarImage;
use resample::resample_planar;
use serde::{Deserialize, Serialize};
use smooth::conv_tri_planar;

/// How a channel type is padded when the pyramid grows its borders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadMode {
    Zero,
    Replicate,
}

/// Metadata describing one channel type inside a bank.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub name: String,
    pub n_planes: usize,
    pub pad_with: PadMode,
}

/// Channel types at a single scale, kept separate for per-type resampling.
#[derive(Clone, Debug)]
pub struct ChannelSet {
    pub types: Vec<PlanarImage<f32>>,
    pub info: Vec<ChannelInfo>,
    /// Plane width at 1/shrink resolution.
    pub w: usize,
    /// Plane height at 1/shrink resolution.
    pub h: usize,
}

impl ChannelSet {
    /// Concatenate all types into one planar stack sharing a backing buffer.
    pub fn concat(&self) -> ChannelBank {
        let n: usize = self.types.iter().map(|t| t.n_planes).sum();
        let mut data = PlanarImage::new(self.w, self.h, 0);
        data.n_planes = n;
        data.data = Vec::with_capacity(self.w * self.h * n);
        for t in &self.types {
            debug_assert_eq!((t.w, t.h), (self.w, self.h));
            data.data.extend_from_slice(&t.data);
        }
        ChannelBank {
            data,
            info: self.info.clone(),
        }
    }
}

/// Packed planar channel stack: C planes of shape (h, w) with constant
/// `plane_stride`, plus per-type metadata.
///
/// The sample type is `f32` on the CPU path; the accelerated stage reads back
/// `u8` banks, which the cascade consumes through its integer fast path.
#[derive(Clone, Debug)]
pub struct ChannelBank<T = f32> {
    pub data: PlanarImage<T>,
    pub info: Vec<ChannelInfo>,
}

impl<T> ChannelBank<T> {
    #[inline]
    pub fn width(&self) -> usize {
        self.data.w
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.h
    }

    #[inline]
    pub fn n_planes(&self) -> usize {
        self.data.n_planes
    }
}

fn add_type(
    set: &mut ChannelSet,
    data: PlanarImage<f32>,
    name: &str,
    pad_with: PadMode,
) {
    let n_planes = data.n_planes;
    let resized = if (data.w, data.h) != (set.w, set.h) {
        resample_planar(&data, set.w, set.h, 1.0)
    } else {
        data
    };
    set.types.push(resized);
    set.info.push(ChannelInfo {
        name: name.to_string(),
        n_planes,
        pad_with,
    });
}

/// Compute all enabled channel types for one image scale.
///
/// The input is cropped so both dimensions divide `shrink`; every output type
/// lands at `(w/shrink, h/shrink)` resolution. `pre_luv` marks input that has
/// already been converted to scaled LUV.
pub fn compute_channels(
    src: &PlanarImage<f32>,
    opts: &ChannelOptions,
    pre_luv: bool,
) -> Result<ChannelSet> {
    opts.validate()?;
    let shrink = opts.shrink;

    let cropped;
    let src = if src.w % shrink != 0 || src.h % shrink != 0 {
        cropped = src.cropped(src.w - src.w % shrink, src.h - src.h % shrink);
        &cropped
    } else {
        src
    };

    let (w, h) = (src.w / shrink, src.h / shrink);
    let mut set = ChannelSet {
        types: Vec::new(),
        info: Vec::new(),
        w,
        h,
    };

    // Color conversion feeds both its own channel type and the gradients.
    let replicated;
    let color_input = if src.n_planes == 1 && opts.color.color_space.output_planes() == 3 {
        replicated = color::replicate_gray(src);
        &replicated
    } else {
        src
    };
    let mut converted = color::rgb_convert(color_input, opts.color.color_space, pre_luv)?;
    conv_tri_planar(&mut converted, opts.color.smooth);

    if opts.color.enabled {
        add_type(&mut set, converted.clone(), "color channels", PadMode::Replicate);
    }

    let need_gradient = opts.grad_mag.enabled || opts.grad_hist.enabled;
    if need_gradient {
        let grad = gradient::gradient_mag(&converted, &opts.grad_mag, false);
        if opts.grad_mag.enabled {
            let mag = PlanarImage::from_planes(std::slice::from_ref(&grad.mag));
            add_type(&mut set, mag, "gradient magnitude", PadMode::Zero);
        }
        if opts.grad_hist.enabled {
            let bin = opts.grad_hist.bin_size.unwrap_or(shrink);
            let hist = hist::gradient_hist(
                &grad.mag,
                &grad.orient,
                &opts.grad_hist,
                bin,
                opts.grad_mag.full,
            );
            add_type(&mut set, hist, "gradient histogram", PadMode::Zero);
        }
    }

    Ok(set)
}
