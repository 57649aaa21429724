//! Hand-built cascade that detects a white 24 px square centered in a
//! 48 px window on a black background.
//!
//! Six depth-2 trees each check one bright cell of the L color plane against
//! one dark cell (two interior probes, and one probe per square boundary).
//! The pass leaf of the first tree carries the full margin and failures are
//! punished hard, so partial sums stay at the final score for true positives
//! and every misaligned window is rejected by the early-exit cascade.
use acf_detector::cascade::{Classifier, Model, ModelOptions};
use acf_detector::nms::{NmsOptions, OverlapDenom};
use acf_detector::Detector;

/// Object window side in source pixels.
pub const WINDOW: usize = 48;
/// Side of the white square the cascade responds to.
pub const SQUARE: usize = 24;
/// Cascade score of a perfectly aligned window.
pub const SCORE: f32 = 6.0;

const THR_BRIGHT: f32 = 0.3;
const THR_DARK: f32 = 0.05;
const FAIL: f32 = -20.0;
const ALWAYS_LEFT: f32 = 1e9;

/// Feature index of cell (c, r) in plane z of the 12×12-cell window.
fn fid(z: usize, c: usize, r: usize) -> u32 {
    (z * 144 + c * 12 + r) as u32
}

pub fn square_model() -> Model {
    // (bright probe, dark probe) per tree, in window cell coordinates.
    // Bright square covers cells 3..=8.
    let probes = [
        ((6, 6), (1, 1)),
        ((6, 6), (10, 10)),
        ((4, 6), (2, 6)),
        ((7, 6), (9, 6)),
        ((6, 4), (6, 2)),
        ((6, 7), (6, 9)),
    ];

    let n_trees = probes.len();
    let n_tree_nodes = 7;
    let mut fids = Vec::with_capacity(n_trees * n_tree_nodes);
    let mut thrs = Vec::with_capacity(n_trees * n_tree_nodes);
    let mut hs = Vec::with_capacity(n_trees * n_tree_nodes);
    for (t, &((bc, br), (dc, dr))) in probes.iter().enumerate() {
        let pass = if t == 0 { SCORE } else { 0.0 };
        // Layout: root, always-left filler, dark probe, then the leaves.
        fids.extend_from_slice(&[fid(0, bc, br), 0, fid(0, dc, dr), 0, 0, 0, 0]);
        thrs.extend_from_slice(&[THR_BRIGHT, ALWAYS_LEFT, THR_DARK, 0.0, 0.0, 0.0, 0.0]);
        hs.extend_from_slice(&[0.0, 0.0, 0.0, FAIL, FAIL, pass, FAIL]);
    }

    let clf = Classifier {
        n_trees,
        n_tree_nodes,
        fids,
        thrs,
        child: Vec::new(),
        hs,
        depth: Vec::new(),
        tree_depth: 2,
        thrs_u8: Vec::new(),
    };

    let mut opts = ModelOptions {
        model_ds: (WINDOW, WINDOW),
        model_ds_pad: (WINDOW, WINDOW),
        stride: 4,
        casc_thr: 0.5,
        nms: NmsOptions {
            overlap: 0.5,
            ovr_denom: OverlapDenom::Union,
            ..Default::default()
        },
        ..Default::default()
    };
    // Sharp cell boundaries keep the hand-tuned thresholds meaningful.
    opts.pyramid.smooth = 0.0;
    opts.pyramid.channels.color.smooth = 0.0;

    Model { opts, clf }
}

pub fn square_detector() -> Detector {
    Detector::new(square_model()).expect("valid synthetic model")
}
