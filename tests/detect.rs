mod common;

use common::model::{square_detector, SCORE, SQUARE, WINDOW};
use common::synthetic_image::{black_planar, squares_planar};

use acf_detector::detector::ModifyOptions;

#[test]
fn vga_black_image_has_formula_level_count_and_no_detections() {
    let mut detector = square_detector();
    detector
        .modify(&ModifyOptions {
            min_ds: Some((16, 16)),
            ..Default::default()
        })
        .unwrap();

    let img = black_planar(640, 480);
    let pyramid = detector.compute_pyramid(&img).unwrap();
    // floor(8 * log2(min(640/16, 480/16)) + 1) = 40
    assert_eq!(pyramid.n_scales(), 40);
    assert!(
        (pyramid.scales[0] - 1.0).abs() < 1e-9,
        "scales[0] = {}",
        pyramid.scales[0]
    );

    let dets = detector.detect_planar(&img).unwrap();
    assert!(dets.is_empty(), "black image produced {dets:?}");
}

#[test]
fn pyramid_levels_share_plane_dims_divisible_from_shrink_rounding() {
    let detector = square_detector();
    let img = squares_planar(96, 96, SQUARE, &[(24, 24)]);
    let pyramid = detector.compute_pyramid(&img).unwrap();
    let shrink = pyramid.opts.channels.shrink;
    for (i, bank) in pyramid.levels.iter().enumerate() {
        // All planes of a level share one shape.
        assert_eq!(bank.data.plane_stride, bank.width() * bank.height());
        // The source-resolution dims behind every level divide shrink.
        let w_px = (96.0 * pyramid.scales[i] / shrink as f64).round() as usize * shrink;
        let h_px = (96.0 * pyramid.scales[i] / shrink as f64).round() as usize * shrink;
        assert_eq!(bank.width() * shrink, w_px, "level {i}");
        assert_eq!(bank.height() * shrink, h_px, "level {i}");
    }
}

#[test]
fn window_sized_image_matches_direct_evaluate() {
    let detector = square_detector();
    let img = squares_planar(WINDOW, WINDOW, SQUARE, &[(24, 24)]);

    let score = detector.evaluate(&img).unwrap();
    assert!(
        (score - SCORE).abs() < 1e-5,
        "evaluate returned {score}, expected {SCORE}"
    );

    let dets = detector.detect_planar(&img).unwrap();
    assert_eq!(dets.len(), 1, "expected one full-window candidate: {dets:?}");
    let d = &dets[0];
    assert!(d.x.abs() < 1e-3 && d.y.abs() < 1e-3);
    assert!((d.w - WINDOW as f32).abs() < 1e-3);
    assert!((d.h - WINDOW as f32).abs() < 1e-3);
    assert!((d.score - score).abs() < 1e-5);
}

#[test]
fn threshold_just_below_score_still_fires() {
    let mut detector = square_detector();
    let img = squares_planar(WINDOW, WINDOW, SQUARE, &[(24, 24)]);
    let score = detector.evaluate(&img).unwrap();

    detector
        .modify(&ModifyOptions {
            casc_thr: Some(score - 1e-3),
            ..Default::default()
        })
        .unwrap();
    let dets = detector.detect_planar(&img).unwrap();
    assert_eq!(dets.len(), 1);
    assert!((dets[0].score - score).abs() < 1e-5);
}

#[test]
fn undersized_image_yields_zero_detections() {
    let detector = square_detector();
    // Below 4 * shrink in both dimensions.
    let img = black_planar(15, 15);
    assert!(detector.detect_planar(&img).unwrap().is_empty());
    let img = black_planar(0, 0);
    assert!(detector.detect_planar(&img).unwrap().is_empty());
}

#[test]
fn tiled_squares_detected_at_both_positions() {
    let detector = square_detector();
    let img = squares_planar(96, 96, SQUARE, &[(24, 24), (72, 24)]);
    let dets = detector.detect_planar(&img).unwrap();
    assert_eq!(dets.len(), 2, "expected two detections: {dets:?}");

    let mut centers: Vec<(f32, f32)> = dets.iter().map(|d| d.center()).collect();
    centers.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    assert!((centers[0].0 - 24.0).abs() <= 1.0 && (centers[0].1 - 24.0).abs() <= 1.0);
    assert!((centers[1].0 - 72.0).abs() <= 1.0 && (centers[1].1 - 24.0).abs() <= 1.0);
}

#[test]
fn doubling_input_doubles_detection_rects() {
    let detector = square_detector();
    let base = squares_planar(96, 96, SQUARE, &[(24, 24), (72, 24)]);
    let doubled = squares_planar(192, 192, 2 * SQUARE, &[(48, 48), (144, 48)]);

    let mut d1 = detector.detect_planar(&base).unwrap();
    let mut d2 = detector.detect_planar(&doubled).unwrap();
    assert_eq!(d1.len(), d2.len(), "{d1:?} vs {d2:?}");
    d1.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap());
    d2.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap());

    for (a, b) in d1.iter().zip(&d2) {
        assert!((b.x - 2.0 * a.x).abs() <= 2.0, "{a:?} vs {b:?}");
        assert!((b.y - 2.0 * a.y).abs() <= 2.0);
        assert!((b.w - 2.0 * a.w).abs() <= 2.0);
        assert!((b.h - 2.0 * a.h).abs() <= 2.0);
    }
}

#[test]
fn lowering_cascade_threshold_never_removes_detections() {
    let mut detector = square_detector();
    detector.set_do_nms(false);
    let img = squares_planar(96, 96, SQUARE, &[(24, 24), (72, 24)]);

    let strict = detector.detect_planar(&img).unwrap();
    detector
        .modify(&ModifyOptions {
            casc_thr: Some(-50.0),
            ..Default::default()
        })
        .unwrap();
    let loose = detector.detect_planar(&img).unwrap();

    assert!(loose.len() >= strict.len());
    for d in &strict {
        assert!(
            loose.iter().any(|l| (l.x - d.x).abs() < 1e-3
                && (l.y - d.y).abs() < 1e-3
                && (l.score - d.score).abs() < 1e-5),
            "detection {d:?} lost when threshold was lowered"
        );
    }
}
