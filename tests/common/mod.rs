//! Common test utilities for norm-core integration tests
#![allow(dead_code)]

use norm_core::nifti_io::{idx3d, Volume};

/// Identity-affine volume with the given dims, spacing, and data.
pub fn volume(data: Vec<f64>, dims: (usize, usize, usize), spacing: (f64, f64, f64)) -> Volume {
    Volume {
        data,
        dims,
        spacing,
        affine: [
            spacing.0, 0.0, 0.0, 0.0,
            0.0, spacing.1, 0.0, 0.0,
            0.0, 0.0, spacing.2, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ],
    }
}

/// A synthetic brain: three well-separated tissue bands (means near 10, 50,
/// and 90) inside a box-shaped brain mask, zero background outside.
///
/// Returns (image, brain mask, expected WM mask). The small deterministic
/// jitter keeps the intensity histogram non-degenerate.
pub fn three_class_brain(dims: (usize, usize, usize)) -> (Volume, Volume, Volume) {
    let (nx, ny, nz) = dims;
    let mut image = volume(vec![0.0; nx * ny * nz], dims, (1.0, 1.0, 1.0));
    let mut brain = image.clone();
    let mut wm = image.clone();

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let inside = i > 0 && i < nx - 1 && j > 0 && j < ny - 1 && k > 0 && k < nz - 1;
                if !inside {
                    continue;
                }
                let idx = idx3d(i, j, k, nx, ny);
                brain.data[idx] = 1.0;
                let jitter = ((i + 2 * j + 3 * k) % 5) as f64 * 0.1;
                // Tissue bands along x: CSF-like, GM-like, WM-like.
                let band = 3 * (i - 1) / (nx - 2).max(1);
                image.data[idx] = match band.min(2) {
                    0 => 10.0 + jitter,
                    1 => 50.0 + jitter,
                    _ => {
                        wm.data[idx] = 1.0;
                        90.0 + jitter
                    }
                };
            }
        }
    }
    (image, brain, wm)
}

/// Mean intensity of `vol` over voxels where `mask` is positive.
pub fn masked_mean(vol: &Volume, mask: &Volume) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (v, m) in vol.data.iter().zip(mask.data.iter()) {
        if *m > 0.0 {
            sum += v;
            count += 1;
        }
    }
    assert!(count > 0, "mask selects no voxels");
    sum / count as f64
}

/// Binary sphere mask on the given grid.
///
/// Voxels within `radius` of the center are 1, all others 0.
pub fn sphere_mask(
    dims: (usize, usize, usize),
    center: (f64, f64, f64),
    radius: f64,
) -> Volume {
    let (nx, ny, nz) = dims;
    let mut mask = volume(vec![0.0; nx * ny * nz], dims, (1.0, 1.0, 1.0));
    let r2 = radius * radius;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let dx = i as f64 - center.0;
                let dy = j as f64 - center.1;
                let dz = k as f64 - center.2;
                if dx * dx + dy * dy + dz * dz <= r2 {
                    mask.data[idx3d(i, j, k, nx, ny)] = 1.0;
                }
            }
        }
    }
    mask
}
