//! Integration tests for WM mask derivation and normalization on synthetic
//! brain volumes.

mod common;

use common::{masked_mean, sphere_mask, three_class_brain, volume};
use norm_core::errors::NormError;
use norm_core::fcm::{fcm_normalize, find_wm_mask, DEFAULT_CLASSES};

#[test]
fn wm_mask_selects_highest_mean_cluster() {
    let (image, brain, expected_wm) = three_class_brain((12, 10, 10));

    let wm = find_wm_mask(&image, &brain, DEFAULT_CLASSES).unwrap();

    assert_eq!(wm.dims, image.dims);
    for (got, want) in wm.data.iter().zip(expected_wm.data.iter()) {
        assert_eq!(got, want, "WM mask disagrees with the brightest band");
    }
}

#[test]
fn wm_mask_is_reproducible() {
    let (image, brain, _) = three_class_brain((12, 10, 10));
    let a = find_wm_mask(&image, &brain, DEFAULT_CLASSES).unwrap();
    let b = find_wm_mask(&image, &brain, DEFAULT_CLASSES).unwrap();
    assert_eq!(a.data, b.data);
}

#[test]
fn normalize_puts_wm_mean_on_target() {
    let (image, brain, _) = three_class_brain((12, 10, 10));
    let wm = find_wm_mask(&image, &brain, DEFAULT_CLASSES).unwrap();

    for target in [1.0, 100.0, 0.5] {
        let normalized = fcm_normalize(&image, &wm, target).unwrap();
        let mean = masked_mean(&normalized, &wm);
        assert!(
            (mean - target).abs() < 1e-9 * target.max(1.0),
            "WM mean {} after normalizing to {}",
            mean,
            target
        );
    }
}

#[test]
fn normalize_twice_is_a_noop() {
    let (image, brain, _) = three_class_brain((12, 10, 10));
    let wm = find_wm_mask(&image, &brain, DEFAULT_CLASSES).unwrap();

    let once = fcm_normalize(&image, &wm, 1.0).unwrap();
    let twice = fcm_normalize(&once, &wm, 1.0).unwrap();
    for (a, b) in once.data.iter().zip(twice.data.iter()) {
        assert!((a - b).abs() < 1e-12, "second normalization changed data");
    }
}

#[test]
fn normalize_rejects_empty_mask() {
    let (image, _, _) = three_class_brain((8, 8, 8));
    let empty = image.with_data(vec![0.0; image.len()]);

    match fcm_normalize(&image, &empty, 1.0) {
        Err(NormError::EmptyMask) => {}
        other => panic!("expected EmptyMask, got {:?}", other),
    }
}

#[test]
fn wm_mask_rejects_degenerate_region() {
    let (image, brain, _) = three_class_brain((8, 8, 8));
    // Flatten the whole brain region to one intensity level.
    let flat = image.with_data(
        image
            .data
            .iter()
            .zip(brain.data.iter())
            .map(|(_, m)| if *m > 0.0 { 42.0 } else { 0.0 })
            .collect(),
    );

    match find_wm_mask(&flat, &brain, DEFAULT_CLASSES) {
        Err(NormError::DegenerateRegion { distinct, classes }) => {
            assert_eq!(distinct, 1);
            assert_eq!(classes, DEFAULT_CLASSES);
        }
        other => panic!("expected DegenerateRegion, got {:?}", other),
    }
}

#[test]
fn normalize_with_spherical_tissue_mask() {
    let dims = (12, 12, 12);
    let image = volume(
        (0..12 * 12 * 12).map(|i| 5.0 + (i % 7) as f64).collect(),
        dims,
        (1.0, 1.0, 1.0),
    );
    let tissue = sphere_mask(dims, (5.5, 5.5, 5.5), 3.0);

    let normalized = fcm_normalize(&image, &tissue, 2.0).unwrap();
    assert!((masked_mean(&normalized, &tissue) - 2.0).abs() < 1e-9);
    // Voxels outside the mask scale by the same factor.
    let scale = normalized.data[0] / image.data[0];
    for (n, o) in normalized.data.iter().zip(image.data.iter()) {
        assert!((n - o * scale).abs() < 1e-9);
    }
}

#[test]
fn wm_mask_requires_matching_grids() {
    let (image, _, _) = three_class_brain((8, 8, 8));
    let (_, other_brain, _) = three_class_brain((8, 8, 9));
    assert!(matches!(
        find_wm_mask(&image, &other_brain, DEFAULT_CLASSES),
        Err(NormError::GridMismatch { .. })
    ));
}
