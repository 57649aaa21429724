//! Accelerated channel stage: a shader-style pass graph producing the same
//! channel banks the CPU pyramid would.
//!
//! The stage is exposed through the [`ChannelProvider`] trait with two
//! implementations: [`CpuChannels`] (the regular pyramid) and
//! [`GpuChannels`] (the tiled pass graph with u8 readback). Both defer their
//! result by one frame so a scheduler can overlap extraction with cascade
//! evaluation. The graph output is packed into one tiled u8 texture; the
//! per-type tile rectangles ride along on the returned pyramid as `rois`.
//!
//! Two channel-order packings are supported: `M012345` (gradient magnitude
//! plus six orientation bins) and `LUVM012345` (three color planes
//! prepended). Any other channel configuration is rejected at setup.
pub mod graph;
pub mod passes;
pub mod tile;

pub use graph::{NodeId, PassGraph, Texture};
pub use passes::PassKind;
pub use tile::{DeferredReadback, TileLayout, TiledTexture};

use crate::channels::color::planar_from_rgb8;
use crate::channels::{ChannelInfo, ColorSpace};
use crate::detector::Detector;
use crate::error::{DetectorError, Result};
use crate::image::{PlanarImage, RgbU8};
use crate::pyramid::Pyramid;
use crate::types::Detection;
use log::debug;
use std::sync::Arc;

/// Handle pairing a frame's channels with the texture that produced them.
pub type TextureId = u64;

/// An input frame: a tight CPU pixel buffer, or an externally owned texture
/// (the latter requires a GL-backed executor).
#[derive(Clone, Debug)]
pub enum FrameInput<'a> {
    Buffer(RgbU8<'a>),
    Texture { id: u32, width: usize, height: usize },
}

impl FrameInput<'_> {
    pub fn size(&self) -> (usize, usize) {
        match self {
            FrameInput::Buffer(view) => (view.w, view.h),
            FrameInput::Texture { width, height, .. } => (*width, *height),
        }
    }
}

/// Channel-order packing of the merged output texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackingKind {
    /// Magnitude plus six orientation bins (7 planes).
    M012345,
    /// LUV prepended (10 planes).
    Luvm012345,
}

impl PackingKind {
    /// Derive the packing from the model's channel configuration.
    pub fn from_channels(opts: &crate::channels::ChannelOptions) -> Result<Self> {
        let hist_ok = opts.grad_hist.enabled
            && opts.grad_hist.n_orients == 6
            && opts.grad_hist.use_hog == 0;
        if !opts.grad_mag.enabled || !hist_ok {
            return Err(DetectorError::config(
                "tiled channel stage supports only magnitude + 6 orientation bins",
            ));
        }
        if opts.color.enabled {
            if opts.color.color_space != ColorSpace::Luv {
                return Err(DetectorError::config(
                    "tiled channel stage requires luv color channels",
                ));
            }
            Ok(PackingKind::Luvm012345)
        } else {
            Ok(PackingKind::M012345)
        }
    }

    pub fn n_planes(&self) -> usize {
        match self {
            PackingKind::M012345 => 7,
            PackingKind::Luvm012345 => 10,
        }
    }
}

/// A pyramid produced by a channel provider: float banks from the CPU path,
/// u8 banks read back from the tiled stage.
#[derive(Clone, Debug)]
pub enum ProviderPyramid {
    F32(Pyramid<f32>),
    U8(Pyramid<u8>),
}

impl ProviderPyramid {
    pub fn n_scales(&self) -> usize {
        match self {
            ProviderPyramid::F32(p) => p.n_scales(),
            ProviderPyramid::U8(p) => p.n_scales(),
        }
    }

    /// Run the cascade over the pyramid, whichever sample type it carries.
    pub fn detect(&self, detector: &Detector) -> Vec<Detection> {
        match self {
            ProviderPyramid::F32(p) => detector.detect_pyramid(p),
            ProviderPyramid::U8(p) => detector.detect_pyramid(p),
        }
    }
}

/// Source of channel pyramids with one frame of latency.
pub trait ChannelProvider: Send {
    fn input_size(&self) -> (usize, usize);

    /// Queue channel extraction for a frame; returns the frame's texture.
    fn enqueue(&mut self, frame: &FrameInput<'_>) -> Result<TextureId>;

    /// Channels of the frame enqueued one call earlier, if any.
    fn retrieve(&mut self) -> Result<Option<(TextureId, ProviderPyramid)>>;
}

fn check_size(expected: (usize, usize), frame: &FrameInput<'_>) -> Result<()> {
    if frame.size() != expected {
        return Err(DetectorError::input(format!(
            "frame size {:?} does not match pipeline initialization {:?}",
            frame.size(),
            expected
        )));
    }
    Ok(())
}

/// CPU channel provider: the regular feature pyramid behind the provider
/// contract, deferred by one frame like the accelerated stage.
pub struct CpuChannels {
    detector: Arc<Detector>,
    input_size: (usize, usize),
    pending: Option<(TextureId, ProviderPyramid)>,
    next_texture: TextureId,
}

impl CpuChannels {
    pub fn new(detector: Arc<Detector>, input_size: (usize, usize)) -> Self {
        Self {
            detector,
            input_size,
            pending: None,
            next_texture: 1,
        }
    }
}

impl ChannelProvider for CpuChannels {
    fn input_size(&self) -> (usize, usize) {
        self.input_size
    }

    fn enqueue(&mut self, frame: &FrameInput<'_>) -> Result<TextureId> {
        check_size(self.input_size, frame)?;
        let view = match frame {
            FrameInput::Buffer(view) => view,
            FrameInput::Texture { .. } => {
                return Err(DetectorError::input(
                    "the CPU channel path requires a pixel buffer",
                ))
            }
        };
        let planar = planar_from_rgb8(view);
        let pyramid = self.detector.compute_pyramid(&planar)?;
        let id = self.next_texture;
        self.next_texture += 1;
        self.pending = Some((id, ProviderPyramid::F32(pyramid)));
        Ok(id)
    }

    fn retrieve(&mut self) -> Result<Option<(TextureId, ProviderPyramid)>> {
        Ok(self.pending.take())
    }
}

/// The tiled pass-graph channel stage.
pub struct GpuChannels {
    graph: PassGraph,
    layout: TileLayout,
    /// Level metadata mirrored from a reference CPU pyramid at setup.
    scales: Vec<f64>,
    scaleshw: Vec<(f64, f64)>,
    lambdas: Vec<f64>,
    info: Vec<ChannelInfo>,
    opts: crate::pyramid::PyramidOptions,
    packing: PackingKind,
    input_size: (usize, usize),
    readback: DeferredReadback<(TextureId, TiledTexture)>,
    next_texture: TextureId,
}

impl GpuChannels {
    /// Set up the stage for a fixed input size, mirroring the level layout a
    /// CPU pyramid would produce for the detector's configuration.
    pub fn new(detector: &Detector, input_size: (usize, usize)) -> Result<Self> {
        let opts = detector.model().opts.pyramid.normalized();
        let packing = PackingKind::from_channels(&opts.channels)?;

        let reference = detector.compute_pyramid(&PlanarImage::new(input_size.0, input_size.1, 3))?;
        if reference.n_scales() == 0 {
            return Err(DetectorError::config(
                "no valid detection scales for the provided configuration",
            ));
        }
        let level_dims: Vec<(usize, usize)> = reference
            .levels
            .iter()
            .map(|bank| (bank.width(), bank.height()))
            .collect();
        let layout = TileLayout::plan(&level_dims, packing.n_planes());
        let graph = build_graph(&opts, packing, input_size, &reference.scales)?;
        debug!(
            "tiled stage: {} levels, {} pass nodes, {}x{} texture",
            level_dims.len(),
            graph.n_nodes(),
            layout.width,
            layout.height
        );

        Ok(Self {
            graph,
            layout,
            scales: reference.scales,
            scaleshw: reference.scaleshw,
            lambdas: reference.lambdas,
            info: reference.info,
            opts,
            packing,
            input_size,
            readback: DeferredReadback::new(),
            next_texture: 1,
        })
    }

    pub fn packing(&self) -> PackingKind {
        self.packing
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    fn pyramid_from(&self, tex: &TiledTexture) -> Pyramid<u8> {
        let banks = tile::unpack_u8(tex)
            .into_iter()
            .map(|data| crate::channels::ChannelBank {
                data,
                info: self.info.clone(),
            })
            .collect();
        Pyramid {
            levels: banks,
            scales: self.scales.clone(),
            scaleshw: self.scaleshw.clone(),
            info: self.info.clone(),
            lambdas: self.lambdas.clone(),
            n_types: self.info.len(),
            rois: self.layout.rois(&self.info),
            opts: self.opts.clone(),
        }
    }
}

impl ChannelProvider for GpuChannels {
    fn input_size(&self) -> (usize, usize) {
        self.input_size
    }

    fn enqueue(&mut self, frame: &FrameInput<'_>) -> Result<TextureId> {
        check_size(self.input_size, frame)?;
        let view = match frame {
            FrameInput::Buffer(view) => view,
            FrameInput::Texture { .. } => {
                return Err(DetectorError::gpu(
                    "external texture sampling requires a GL-backed executor",
                ))
            }
        };
        let source = planar_from_rgb8(view);
        let level_textures = self.graph.execute(&source)?;
        let packed = tile::pack_levels(&level_textures, &self.layout)?;
        let id = self.next_texture;
        self.next_texture += 1;
        self.readback.push((id, packed));
        Ok(id)
    }

    fn retrieve(&mut self) -> Result<Option<(TextureId, ProviderPyramid)>> {
        Ok(self
            .readback
            .take()
            .map(|(id, tex)| (id, ProviderPyramid::U8(self.pyramid_from(&tex)))))
    }
}

/// Assemble the per-level pass graph:
/// `rotate → smooth → rgb2luv → resample(level)`, then per level a gradient
/// branch (`gradient → norm → {magnitude, hist bins 0..4, 4..6}`), each
/// branch smoothed, reduced, padded, and merged in channel order.
fn build_graph(
    opts: &crate::pyramid::PyramidOptions,
    packing: PackingKind,
    input_size: (usize, usize),
    scales: &[f64],
) -> Result<PassGraph> {
    let chn = &opts.channels;
    let shrink = chn.shrink;
    let pad = (opts.pad.0 / shrink, opts.pad.1 / shrink);
    let mut g = PassGraph::new();

    let src = g.add(PassKind::Source, &[])?;
    let rotated = g.add(PassKind::Rotate { quarter_turns: 0 }, &[src])?;
    let smoothed = g.add(
        PassKind::Smooth {
            radius: chn.color.smooth,
        },
        &[rotated],
    )?;
    let luv = g.add(PassKind::Rgb2Luv, &[smoothed])?;

    for &scale in scales {
        let s = shrink as f64;
        let cw = (input_size.0 as f64 * scale / s).round() as usize;
        let ch = (input_size.1 as f64 * scale / s).round() as usize;
        let level = g.add(
            PassKind::Resample {
                w: cw * shrink,
                h: ch * shrink,
            },
            &[luv],
        )?;

        let branch = |g: &mut PassGraph, node: NodeId, replicate: bool| -> Result<NodeId> {
            let sm = g.add(PassKind::Smooth { radius: opts.smooth }, &[node])?;
            let red = g.add(PassKind::Reduce { factor: shrink }, &[sm])?;
            g.add(
                PassKind::Pad {
                    x: pad.0,
                    y: pad.1,
                    replicate,
                },
                &[red],
            )
        };

        let grad = g.add(
            PassKind::Gradient {
                full: chn.grad_mag.full,
            },
            &[level],
        )?;
        let norm = g.add(
            PassKind::GradNorm {
                radius: chn.grad_mag.norm_rad as f64,
                norm_const: chn.grad_mag.norm_const,
            },
            &[grad],
        )?;

        let mag = g.add(PassKind::Select { first: 0, count: 1 }, &[norm])?;
        let mag_out = branch(&mut g, mag, false)?;

        let n_orients = chn.grad_hist.n_orients;
        let bins_lo = g.add(
            PassKind::HistBins {
                first: 0,
                count: 4,
                n_orients,
                full: chn.grad_mag.full,
            },
            &[norm],
        )?;
        let bins_hi = g.add(
            PassKind::HistBins {
                first: 4,
                count: 2,
                n_orients,
                full: chn.grad_mag.full,
            },
            &[norm],
        )?;
        let lo_out = branch(&mut g, bins_lo, false)?;
        let hi_out = branch(&mut g, bins_hi, false)?;

        let hist = g.add(PassKind::Merge2, &[lo_out, hi_out])?;
        let m_hist = g.add(PassKind::Merge2, &[mag_out, hist])?;

        let packed = match packing {
            PackingKind::M012345 => m_hist,
            PackingKind::Luvm012345 => {
                let luv_out = branch(&mut g, level, true)?;
                g.add(PassKind::Merge2, &[luv_out, m_hist])?
            }
        };
        g.mark_output(packed);
    }

    Ok(g)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{Classifier, Model, ModelOptions};

    fn small_detector() -> Detector {
        let clf = Classifier {
            n_trees: 1,
            n_tree_nodes: 3,
            fids: vec![0, 0, 0],
            thrs: vec![0.5, 0.0, 0.0],
            child: Vec::new(),
            hs: vec![0.0, -1.0, 1.0],
            depth: Vec::new(),
            tree_depth: 1,
            thrs_u8: Vec::new(),
        };
        let model = Model {
            opts: ModelOptions {
                model_ds: (16, 16),
                model_ds_pad: (16, 16),
                ..Default::default()
            },
            clf,
        };
        Detector::new(model).unwrap()
    }

    #[test]
    fn packing_follows_channel_config() {
        let mut opts = crate::channels::ChannelOptions::default();
        assert_eq!(
            PackingKind::from_channels(&opts).unwrap(),
            PackingKind::Luvm012345
        );
        opts.color.enabled = false;
        assert_eq!(
            PackingKind::from_channels(&opts).unwrap(),
            PackingKind::M012345
        );
        opts.grad_hist.n_orients = 4;
        assert!(PackingKind::from_channels(&opts).is_err());
    }

    #[test]
    fn stage_matches_reference_level_layout() {
        let detector = small_detector();
        let stage = GpuChannels::new(&detector, (64, 64)).unwrap();
        let reference = detector
            .compute_pyramid(&PlanarImage::new(64, 64, 3))
            .unwrap();
        assert_eq!(stage.scales.len(), reference.n_scales());
        assert_eq!(stage.layout.tiles.len(), reference.n_scales());
        assert_eq!(stage.packing(), PackingKind::Luvm012345);
    }

    #[test]
    fn provider_defers_by_one_frame() {
        let detector = small_detector();
        let mut stage = GpuChannels::new(&detector, (64, 64)).unwrap();
        let pixels = vec![128u8; 64 * 64 * 3];
        let frame = FrameInput::Buffer(RgbU8::new(64, 64, 3, &pixels));

        assert!(stage.retrieve().unwrap().is_none());
        let t0 = stage.enqueue(&frame).unwrap();
        let (id, pyr) = stage.retrieve().unwrap().expect("frame 0 channels");
        assert_eq!(id, t0);
        assert!(pyr.n_scales() > 0);
        if let ProviderPyramid::U8(p) = &pyr {
            assert_eq!(p.rois.len(), p.n_scales());
            assert_eq!(p.levels[0].n_planes(), 10);
        } else {
            panic!("expected u8 pyramid");
        }
    }

    #[test]
    fn frame_size_mismatch_is_fatal() {
        let detector = small_detector();
        let mut stage = GpuChannels::new(&detector, (64, 64)).unwrap();
        let pixels = vec![0u8; 32 * 32 * 3];
        let frame = FrameInput::Buffer(RgbU8::new(32, 32, 3, &pixels));
        assert!(matches!(
            stage.enqueue(&frame),
            Err(DetectorError::Input(_))
        ));
    }

    #[test]
    fn gpu_channels_approximate_cpu_channels() {
        let detector = small_detector();
        let mut stage = GpuChannels::new(&detector, (64, 64)).unwrap();

        // A vertical step edge produces structured channels.
        let mut pixels = vec![0u8; 64 * 64 * 3];
        for y in 0..64 {
            for x in 32..64 {
                let i = (y * 64 + x) * 3;
                pixels[i] = 200;
                pixels[i + 1] = 200;
                pixels[i + 2] = 200;
            }
        }
        let frame = FrameInput::Buffer(RgbU8::new(64, 64, 3, &pixels));
        stage.enqueue(&frame).unwrap();
        let (_, gpu_pyr) = stage.retrieve().unwrap().unwrap();
        let ProviderPyramid::U8(gpu_pyr) = gpu_pyr else {
            panic!("expected u8 pyramid")
        };

        let planar = planar_from_rgb8(&RgbU8::new(64, 64, 3, &pixels));
        let cpu_pyr = detector.compute_pyramid(&planar).unwrap();

        // Same scale layout and plane ordering; the bounded color planes
        // agree within quantization and filtering tolerance.
        assert_eq!(gpu_pyr.n_scales(), cpu_pyr.n_scales());
        let g0 = &gpu_pyr.levels[0];
        let c0 = &cpu_pyr.levels[0];
        assert_eq!((g0.width(), g0.height()), (c0.width(), c0.height()));
        let mut max_err = 0.0f32;
        for p in 0..3 {
            for (gu, cf) in g0.data.plane(p).iter().zip(c0.data.plane(p)) {
                max_err = max_err.max((*gu as f32 / 255.0 - cf).abs());
            }
        }
        assert!(max_err < 0.2, "color channel divergence {max_err}");
        // The magnitude plane carries structure at the step edge.
        assert!(g0.data.plane(3).iter().any(|&v| v > 0));
    }
}
