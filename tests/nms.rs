use acf_detector::nms::{suppress, NmsKind, NmsOptions, OverlapDenom};
use acf_detector::types::Detection;

fn opts_union(overlap: f32) -> NmsOptions {
    NmsOptions {
        kind: NmsKind::MaxGreedy,
        overlap,
        ovr_denom: OverlapDenom::Union,
        ..Default::default()
    }
}

#[test]
fn overlapping_stack_collapses_to_strongest_and_distant() {
    // Four 10×10 boxes at centers (5,5), (5,6), (5,7), (50,50).
    let dets = vec![
        Detection::new(0.0, 0.0, 10.0, 10.0, 1.0),
        Detection::new(0.0, 1.0, 10.0, 10.0, 0.9),
        Detection::new(0.0, 2.0, 10.0, 10.0, 0.8),
        Detection::new(45.0, 45.0, 10.0, 10.0, 0.7),
    ];
    let out = suppress(&dets, &opts_union(0.5));
    assert_eq!(out.len(), 2, "expected exactly two boxes: {out:?}");
    assert_eq!(out[0].score, 1.0);
    assert_eq!((out[0].x, out[0].y), (0.0, 0.0));
    assert_eq!(out[1].score, 0.7);
    assert_eq!((out[1].x, out[1].y), (45.0, 45.0));
}

#[test]
fn suppression_is_idempotent() {
    let dets: Vec<Detection> = (0..20)
        .map(|i| {
            Detection::new(
                (i % 5) as f32 * 3.0,
                (i / 5) as f32 * 3.0,
                12.0,
                12.0,
                1.0 + (i as f32) * 0.05,
            )
        })
        .collect();
    for opts in [opts_union(0.5), opts_union(0.3)] {
        let once = suppress(&dets, &opts);
        let twice = suppress(&once, &opts);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(&twice) {
            assert_eq!(
                (a.x, a.y, a.w, a.h, a.score),
                (b.x, b.y, b.w, b.h, b.score)
            );
        }
    }
}

#[test]
fn output_is_sorted_by_descending_score() {
    let dets = vec![
        Detection::new(0.0, 0.0, 5.0, 5.0, 0.2),
        Detection::new(20.0, 0.0, 5.0, 5.0, 0.9),
        Detection::new(40.0, 0.0, 5.0, 5.0, 0.5),
    ];
    let out = suppress(&dets, &opts_union(0.5));
    assert_eq!(out.len(), 3);
    assert!(out.windows(2).all(|p| p[0].score >= p[1].score));
}

#[test]
fn non_greedy_max_lets_suppressed_boxes_suppress() {
    // b harvests c in plain max mode even after a removed b.
    let dets = vec![
        Detection::new(0.0, 0.0, 10.0, 10.0, 1.0),
        Detection::new(0.0, 4.0, 10.0, 10.0, 0.9),
        Detection::new(0.0, 8.0, 10.0, 10.0, 0.8),
    ];
    let plain = suppress(
        &dets,
        &NmsOptions {
            kind: NmsKind::Max,
            overlap: 0.3,
            ovr_denom: OverlapDenom::Union,
            ..Default::default()
        },
    );
    let greedy = suppress(
        &dets,
        &NmsOptions {
            kind: NmsKind::MaxGreedy,
            overlap: 0.3,
            ovr_denom: OverlapDenom::Union,
            ..Default::default()
        },
    );
    // a–b overlap: 6/14 > 0.3 suppresses b; b–c likewise, a–c = 2/18 < 0.3.
    assert_eq!(plain.len(), 1, "{plain:?}");
    assert_eq!(greedy.len(), 2, "{greedy:?}");
}
