//! Fuzzy c-means tissue clustering and WM-referenced normalization
//!
//! Models the tissue classes of the brain by clustering masked voxel
//! intensities with fuzzy c-means, takes the brightest class as white
//! matter (T1-w contrast), and rescales the whole image so the WM mean
//! lands on a target value.

use tracing::debug;

use crate::errors::{NormError, Result};
use crate::nifti_io::Volume;

/// Number of tissue classes modeled by default (CSF, GM, WM on T1-w).
pub const DEFAULT_CLASSES: usize = 3;

/// Fuzzy exponent. m = 2 gives the standard membership update.
const FUZZINESS: f64 = 2.0;
const MAX_ITERS: usize = 100;
const MEAN_SHIFT_TOL: f64 = 1e-6;

/// Count distinct values in a sorted slice.
fn count_distinct(sorted: &[f64]) -> usize {
    let mut distinct = 0;
    let mut prev = f64::NAN;
    for &v in sorted {
        if v != prev {
            distinct += 1;
            prev = v;
        }
    }
    distinct
}

/// Cluster intensities into `num_classes` by fuzzy c-means.
///
/// Returns the converged class means in ascending order. Initialization is
/// deterministic (means spread evenly over the intensity range), so repeated
/// runs on the same input produce identical results. Fails with
/// [`NormError::DegenerateRegion`] when the input has fewer distinct values
/// than requested classes.
pub fn fcm_cluster(values: &[f64], num_classes: usize) -> Result<Vec<f64>> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let distinct = count_distinct(&sorted);
    if distinct < num_classes {
        return Err(NormError::DegenerateRegion {
            distinct,
            classes: num_classes,
        });
    }

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let span = max - min;

    // Deterministic init: means spread evenly across the intensity range.
    let mut means: Vec<f64> = (0..num_classes)
        .map(|c| min + (c as f64 + 0.5) * span / num_classes as f64)
        .collect();

    let exponent = 2.0 / (FUZZINESS - 1.0);
    for iter in 0..MAX_ITERS {
        let mut num = vec![0.0f64; num_classes];
        let mut den = vec![0.0f64; num_classes];

        for &v in values {
            let d2: Vec<f64> = means.iter().map(|&m| (v - m) * (v - m)).collect();

            // A voxel sitting exactly on a mean belongs wholly to that class.
            if let Some(hit) = d2.iter().position(|&d| d == 0.0) {
                num[hit] += v;
                den[hit] += 1.0;
                continue;
            }

            for c in 0..num_classes {
                // u_c = 1 / sum_j (d_c / d_j)^(2/(m-1))
                let inv: f64 = d2.iter().map(|&dj| (d2[c] / dj).powf(exponent / 2.0)).sum();
                let u = 1.0 / inv;
                let w = u.powf(FUZZINESS);
                num[c] += w * v;
                den[c] += w;
            }
        }

        let mut shift = 0.0f64;
        for c in 0..num_classes {
            if den[c] > 0.0 {
                let updated = num[c] / den[c];
                shift = shift.max((updated - means[c]).abs());
                means[c] = updated;
            }
        }

        if shift < MEAN_SHIFT_TOL {
            debug!("fcm converged after {} iterations", iter + 1);
            break;
        }
    }

    means.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(means)
}

/// Derive a white-matter mask from an image and its brain mask.
///
/// Clusters intensities inside `brain_mask` into `num_classes` tissue
/// classes; the WM class is the one with the highest mean (T1-w contrast).
/// The returned mask is 1 exactly where a voxel is inside `brain_mask` and
/// closest to the WM class mean, 0 elsewhere.
pub fn find_wm_mask(image: &Volume, brain_mask: &Volume, num_classes: usize) -> Result<Volume> {
    image.check_same_grid(brain_mask)?;

    let masked: Vec<f64> = image
        .data
        .iter()
        .zip(brain_mask.data.iter())
        .filter(|(_, m)| **m > 0.0)
        .map(|(v, _)| *v)
        .collect();
    if masked.is_empty() {
        return Err(NormError::EmptyMask);
    }

    let means = fcm_cluster(&masked, num_classes)?;
    let wm_mean = means[num_classes - 1];
    debug!("tissue class means: {:?}, wm mean {}", means, wm_mean);

    // Hard assignment: nearest mean wins; ties go to the brighter class,
    // so a voxel exactly between GM and WM counts as WM.
    let data = image
        .data
        .iter()
        .zip(brain_mask.data.iter())
        .map(|(&v, &m)| {
            if m <= 0.0 {
                return 0.0;
            }
            let mut best = 0usize;
            for (c, &mean) in means.iter().enumerate() {
                if (v - mean).abs() <= (v - means[best]).abs() {
                    best = c;
                }
            }
            if means[best] == wm_mean {
                1.0
            } else {
                0.0
            }
        })
        .collect();

    Ok(image.with_data(data))
}

/// Rescale an image so its WM-masked mean equals `norm_value`.
///
/// Pure: metadata is unchanged and nothing is written. Fails with
/// [`NormError::EmptyMask`] when the mask selects no voxels and
/// [`NormError::NonPositiveMean`] when the masked mean is not positive.
pub fn fcm_normalize(image: &Volume, wm_mask: &Volume, norm_value: f64) -> Result<Volume> {
    image.check_same_grid(wm_mask)?;

    let mean = image.mean_where(wm_mask).ok_or(NormError::EmptyMask)?;
    if mean <= 0.0 {
        return Err(NormError::NonPositiveMean(mean));
    }

    let scale = norm_value / mean;
    debug!("wm mean {}, scaling by {}", mean, scale);
    Ok(image.with_data(image.data.iter().map(|&v| v * scale).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_from(data: Vec<f64>, dims: (usize, usize, usize)) -> Volume {
        Volume {
            data,
            dims,
            spacing: (1.0, 1.0, 1.0),
            affine: [
                1.0, 0.0, 0.0, 0.0,
                0.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        }
    }

    #[test]
    fn test_cluster_three_separated_groups() {
        let mut values = Vec::new();
        for i in 0..50 {
            values.push(10.0 + 0.01 * i as f64);
            values.push(50.0 + 0.01 * i as f64);
            values.push(90.0 + 0.01 * i as f64);
        }
        let means = fcm_cluster(&values, 3).unwrap();
        assert!((means[0] - 10.25).abs() < 1.0, "means: {:?}", means);
        assert!((means[1] - 50.25).abs() < 1.0, "means: {:?}", means);
        assert!((means[2] - 90.25).abs() < 1.0, "means: {:?}", means);
    }

    #[test]
    fn test_cluster_deterministic() {
        let values: Vec<f64> = (0..300).map(|i| ((i * 37) % 100) as f64).collect();
        let a = fcm_cluster(&values, 3).unwrap();
        let b = fcm_cluster(&values, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cluster_degenerate() {
        let values = vec![5.0; 100];
        let err = fcm_cluster(&values, 3).unwrap_err();
        match err {
            NormError::DegenerateRegion { distinct, classes } => {
                assert_eq!(distinct, 1);
                assert_eq!(classes, 3);
            }
            other => panic!("expected DegenerateRegion, got {:?}", other),
        }
    }

    #[test]
    fn test_find_wm_mask_selects_brightest() {
        // Two voxels per tissue class, all inside the brain mask.
        let image = volume_from(vec![10.0, 11.0, 50.0, 51.0, 90.0, 91.0], (6, 1, 1));
        let brain = image.with_data(vec![1.0; 6]);

        let wm = find_wm_mask(&image, &brain, 3).unwrap();
        assert_eq!(wm.data, vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_find_wm_mask_respects_region() {
        let image = volume_from(vec![10.0, 11.0, 50.0, 51.0, 90.0, 91.0], (6, 1, 1));
        let mut brain = image.with_data(vec![1.0; 6]);
        brain.data[5] = 0.0; // exclude one bright voxel from the region

        let wm = find_wm_mask(&image, &brain, 3).unwrap();
        assert_eq!(wm.data[5], 0.0);
        assert_eq!(wm.data[4], 1.0);
    }

    #[test]
    fn test_find_wm_mask_empty_region() {
        let image = volume_from(vec![1.0, 2.0, 3.0], (3, 1, 1));
        let brain = image.with_data(vec![0.0, 0.0, 0.0]);
        assert!(matches!(
            find_wm_mask(&image, &brain, 3),
            Err(NormError::EmptyMask)
        ));
    }

    #[test]
    fn test_normalize_hits_target() {
        let image = volume_from(vec![2.0, 4.0, 8.0, 16.0], (4, 1, 1));
        let wm = image.with_data(vec![0.0, 1.0, 1.0, 0.0]); // mean 6
        let out = fcm_normalize(&image, &wm, 1.0).unwrap();
        let mean = out.mean_where(&wm).unwrap();
        assert!((mean - 1.0).abs() < 1e-12);
        assert!((out.data[0] - 2.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_idempotent() {
        let image = volume_from(vec![2.0, 4.0, 8.0, 16.0], (4, 1, 1));
        let wm = image.with_data(vec![0.0, 1.0, 1.0, 0.0]);
        let once = fcm_normalize(&image, &wm, 1.0).unwrap();
        let twice = fcm_normalize(&once, &wm, 1.0).unwrap();
        for (a, b) in once.data.iter().zip(twice.data.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_normalize_empty_mask() {
        let image = volume_from(vec![1.0, 2.0], (2, 1, 1));
        let wm = image.with_data(vec![0.0, 0.0]);
        assert!(matches!(
            fcm_normalize(&image, &wm, 1.0),
            Err(NormError::EmptyMask)
        ));
    }

    #[test]
    fn test_normalize_non_positive_mean() {
        let image = volume_from(vec![-3.0, 1.0], (2, 1, 1));
        let wm = image.with_data(vec![1.0, 1.0]); // mean -1
        match fcm_normalize(&image, &wm, 1.0) {
            Err(NormError::NonPositiveMean(m)) => assert!(m <= 0.0),
            other => panic!("expected NonPositiveMean, got {:?}", other),
        }
    }
}
