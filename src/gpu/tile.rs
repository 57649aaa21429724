//! Tiled pyramid texture layout and channel readback.
//!
//! All pyramid levels are packed into one u8 texture: levels are laid out
//! left to right with tops aligned, and within a level the channel planes
//! are stacked vertically. `rois` records the rectangle of every channel
//! type inside its level tile. Readback unpacks tiles into planar banks,
//! either as raw u8 or as f32 with a per-channel scale, and a deferred
//! (persistent-mapped-buffer style) handoff postpones the unpack by one
//! frame so transfer overlaps compute.
use crate::channels::ChannelInfo;
use crate::error::{DetectorError, Result};
use crate::image::PlanarImage;
use crate::types::Rect;

/// Placement of every pyramid level inside the packed texture.
#[derive(Clone, Debug)]
pub struct TileLayout {
    /// One tile per level covering all of its stacked planes.
    pub tiles: Vec<Rect>,
    /// Channel plane size per level.
    pub level_dims: Vec<(usize, usize)>,
    pub n_planes: usize,
    /// Packed texture size.
    pub width: usize,
    pub height: usize,
}

impl TileLayout {
    /// Plan the packed layout for the given per-level plane sizes.
    pub fn plan(level_dims: &[(usize, usize)], n_planes: usize) -> Self {
        let mut tiles = Vec::with_capacity(level_dims.len());
        let mut x = 0usize;
        let mut height = 0usize;
        for &(w, h) in level_dims {
            let tile_h = h * n_planes;
            tiles.push(Rect::new(x, 0, w, tile_h));
            x += w;
            height = height.max(tile_h);
        }
        Self {
            tiles,
            level_dims: level_dims.to_vec(),
            n_planes,
            width: x,
            height,
        }
    }

    /// Rectangle of each channel type inside each level tile.
    pub fn rois(&self, info: &[ChannelInfo]) -> Vec<Vec<Rect>> {
        self.tiles
            .iter()
            .zip(&self.level_dims)
            .map(|(tile, &(w, h))| {
                let mut out = Vec::with_capacity(info.len());
                let mut plane = 0usize;
                for chn in info {
                    out.push(Rect::new(tile.x, plane * h, w, chn.n_planes * h));
                    plane += chn.n_planes;
                }
                out
            })
            .collect()
    }
}

/// The packed single-channel u8 texture holding every level.
#[derive(Clone, Debug)]
pub struct TiledTexture {
    pub data: PlanarImage<u8>,
    pub layout: TileLayout,
}

/// Quantize per-level f32 banks (values in [0, 1]) into the packed texture.
pub fn pack_levels(levels: &[PlanarImage<f32>], layout: &TileLayout) -> Result<TiledTexture> {
    if levels.len() != layout.tiles.len() {
        return Err(DetectorError::gpu(format!(
            "expected {} levels, got {}",
            layout.tiles.len(),
            levels.len()
        )));
    }
    let mut canvas: PlanarImage<u8> = PlanarImage::new(layout.width, layout.height, 1);
    for (level, tile) in levels.iter().zip(&layout.tiles) {
        if level.n_planes != layout.n_planes {
            return Err(DetectorError::gpu(format!(
                "level carries {} planes, layout expects {}",
                level.n_planes, layout.n_planes
            )));
        }
        for p in 0..level.n_planes {
            for y in 0..level.h {
                for x in 0..level.w {
                    let v = (level.get(p, x, y) * 255.0).clamp(0.0, 255.0).round() as u8;
                    canvas.set(0, tile.x + x, p * level.h + y, v);
                }
            }
        }
    }
    Ok(TiledTexture {
        data: canvas,
        layout: layout.clone(),
    })
}

/// Unpack the tiles back into per-level planar u8 banks.
pub fn unpack_u8(tex: &TiledTexture) -> Vec<PlanarImage<u8>> {
    let layout = &tex.layout;
    layout
        .tiles
        .iter()
        .zip(&layout.level_dims)
        .map(|(tile, &(w, h))| {
            let mut bank: PlanarImage<u8> = PlanarImage::new(w, h, layout.n_planes);
            for p in 0..layout.n_planes {
                for y in 0..h {
                    for x in 0..w {
                        bank.set(p, x, y, tex.data.get(0, tile.x + x, p * h + y));
                    }
                }
            }
            bank
        })
        .collect()
}

/// Unpack to f32 banks, applying a per-plane scale (texel × scale).
pub fn unpack_f32(tex: &TiledTexture, plane_scales: &[f32]) -> Result<Vec<PlanarImage<f32>>> {
    let layout = &tex.layout;
    if plane_scales.len() != layout.n_planes {
        return Err(DetectorError::gpu(format!(
            "expected {} plane scales, got {}",
            layout.n_planes,
            plane_scales.len()
        )));
    }
    Ok(layout
        .tiles
        .iter()
        .zip(&layout.level_dims)
        .map(|(tile, &(w, h))| {
            let mut bank = PlanarImage::new(w, h, layout.n_planes);
            for p in 0..layout.n_planes {
                let scale = plane_scales[p];
                for y in 0..h {
                    for x in 0..w {
                        let v = tex.data.get(0, tile.x + x, p * h + y) as f32 * scale;
                        bank.set(p, x, y, v);
                    }
                }
            }
            bank
        })
        .collect())
}

/// One-deep deferred handoff: pushing a new frame returns the previous one,
/// so the consumer always reads data produced a frame earlier.
#[derive(Debug, Default)]
pub struct DeferredReadback<T> {
    pending: Option<T>,
}

impl<T> DeferredReadback<T> {
    pub fn new() -> Self {
        Self { pending: None }
    }

    pub fn push(&mut self, value: T) -> Option<T> {
        self.pending.replace(value)
    }

    pub fn take(&mut self) -> Option<T> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::PadMode;

    fn info(planes: &[usize]) -> Vec<ChannelInfo> {
        planes
            .iter()
            .enumerate()
            .map(|(i, &n)| ChannelInfo {
                name: format!("type{i}"),
                n_planes: n,
                pad_with: PadMode::Zero,
            })
            .collect()
    }

    #[test]
    fn layout_concatenates_levels_left_aligned() {
        let layout = TileLayout::plan(&[(8, 6), (4, 3)], 10);
        assert_eq!(layout.width, 12);
        assert_eq!(layout.height, 60);
        assert_eq!(layout.tiles[1], Rect::new(8, 0, 4, 30));
    }

    #[test]
    fn rois_partition_each_tile_by_type() {
        let layout = TileLayout::plan(&[(8, 6)], 10);
        let rois = layout.rois(&info(&[3, 1, 6]));
        assert_eq!(rois[0][0], Rect::new(0, 0, 8, 18));
        assert_eq!(rois[0][1], Rect::new(0, 18, 8, 6));
        assert_eq!(rois[0][2], Rect::new(0, 24, 8, 36));
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let layout = TileLayout::plan(&[(4, 2), (2, 1)], 2);
        let mut a = PlanarImage::new(4, 2, 2);
        let mut b = PlanarImage::new(2, 1, 2);
        for (i, v) in a.data.iter_mut().enumerate() {
            *v = (i as f32) / 16.0;
        }
        for (i, v) in b.data.iter_mut().enumerate() {
            *v = (i as f32) / 4.0;
        }
        let tex = pack_levels(&[a.clone(), b], &layout).unwrap();
        let banks = unpack_u8(&tex);
        assert_eq!(banks.len(), 2);
        let expect = (a.get(1, 2, 1) * 255.0).round() as u8;
        assert_eq!(banks[0].get(1, 2, 1), expect);

        let floats = unpack_f32(&tex, &[1.0 / 255.0; 2]).unwrap();
        assert!((floats[0].get(1, 2, 1) - a.get(1, 2, 1)).abs() < 1.0 / 255.0);
    }

    #[test]
    fn deferred_readback_is_one_frame_late() {
        let mut pbo = DeferredReadback::new();
        assert!(pbo.push(1).is_none());
        assert_eq!(pbo.push(2), Some(1));
        assert_eq!(pbo.take(), Some(2));
        assert!(!pbo.is_pending());
    }
}
