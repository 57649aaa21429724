//! Synthetic inputs for end-to-end detection tests.
use acf_detector::image::PlanarImage;

/// All-black planar RGB image.
pub fn black_planar(width: usize, height: usize) -> PlanarImage<f32> {
    PlanarImage::new(width, height, 3)
}

/// Black background with white axis-aligned squares of side `side` centered
/// at the given pixel positions.
pub fn squares_planar(
    width: usize,
    height: usize,
    side: usize,
    centers: &[(usize, usize)],
) -> PlanarImage<f32> {
    let mut img = PlanarImage::new(width, height, 3);
    for &(cx, cy) in centers {
        let x0 = cx.saturating_sub(side / 2);
        let y0 = cy.saturating_sub(side / 2);
        for y in y0..(y0 + side).min(height) {
            for x in x0..(x0 + side).min(width) {
                for p in 0..3 {
                    img.set(p, x, y, 1.0);
                }
            }
        }
    }
    img
}

/// Interleaved RGB bytes for the same square pattern (pipeline inputs).
pub fn squares_rgb8(
    width: usize,
    height: usize,
    side: usize,
    centers: &[(usize, usize)],
) -> Vec<u8> {
    let planar = squares_planar(width, height, side, centers);
    let mut data = vec![0u8; width * height * 3];
    for y in 0..height {
        for x in 0..width {
            for c in 0..3 {
                data[(y * width + x) * 3 + c] = (planar.get(c, x, y) * 255.0) as u8;
            }
        }
    }
    data
}
