//! Resampling and interpolation
//!
//! Interpolators sample a volume at continuous voxel coordinates. Images
//! are resampled with the cubic B-spline kernel; masks use nearest-neighbor
//! so they stay binary. Points outside the volume sample as background (0).

use crate::nifti_io::{idx3d, Volume};

/// Cubic B-spline basis function.
///
/// - (2/3) - |x|^2 + (1/2)|x|^3    for |x| < 1
/// - (1/6)(2 - |x|)^3              for 1 <= |x| < 2
/// - 0                             otherwise
fn cubic_bspline(x: f64) -> f64 {
    let abs_x = x.abs();
    if abs_x < 1.0 {
        (2.0 / 3.0) - abs_x.powi(2) + 0.5 * abs_x.powi(3)
    } else if abs_x < 2.0 {
        let two_minus_x = 2.0 - abs_x;
        (1.0 / 6.0) * two_minus_x.powi(3)
    } else {
        0.0
    }
}

/// Interpolation kernel for sampling at continuous voxel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolator {
    /// Nearest voxel; the only kernel safe for label/mask volumes.
    NearestNeighbor,
    /// Trilinear.
    Linear,
    /// Cubic B-spline over a 4x4x4 neighborhood; for continuous intensities.
    BSpline,
}

impl Interpolator {
    /// Sample `vol` at the continuous voxel coordinate (x, y, z).
    ///
    /// Coordinates outside the volume return 0.
    pub fn sample(&self, vol: &Volume, x: f64, y: f64, z: f64) -> f64 {
        let (nx, ny, nz) = vol.dims;
        match self {
            Interpolator::NearestNeighbor => {
                let i = x.round();
                let j = y.round();
                let k = z.round();
                if i < 0.0
                    || j < 0.0
                    || k < 0.0
                    || i >= nx as f64
                    || j >= ny as f64
                    || k >= nz as f64
                {
                    return 0.0;
                }
                vol.data[idx3d(i as usize, j as usize, k as usize, nx, ny)]
            }
            Interpolator::Linear => {
                let x0 = x.floor();
                let y0 = y.floor();
                let z0 = z.floor();
                let fx = x - x0;
                let fy = y - y0;
                let fz = z - z0;

                let fetch = |i: isize, j: isize, k: isize| -> f64 {
                    if i < 0
                        || j < 0
                        || k < 0
                        || i >= nx as isize
                        || j >= ny as isize
                        || k >= nz as isize
                    {
                        0.0
                    } else {
                        vol.data[idx3d(i as usize, j as usize, k as usize, nx, ny)]
                    }
                };

                let (i0, j0, k0) = (x0 as isize, y0 as isize, z0 as isize);
                let mut acc = 0.0;
                for dk in 0..2 {
                    for dj in 0..2 {
                        for di in 0..2 {
                            let w = (if di == 0 { 1.0 - fx } else { fx })
                                * (if dj == 0 { 1.0 - fy } else { fy })
                                * (if dk == 0 { 1.0 - fz } else { fz });
                            if w > 0.0 {
                                acc += w * fetch(i0 + di, j0 + dj, k0 + dk);
                            }
                        }
                    }
                }
                acc
            }
            Interpolator::BSpline => {
                let i0 = x.floor() as isize - 1;
                let j0 = y.floor() as isize - 1;
                let k0 = z.floor() as isize - 1;

                let mut acc = 0.0;
                let mut weight_sum = 0.0;
                for dk in 0..4 {
                    for dj in 0..4 {
                        for di in 0..4 {
                            let i = i0 + di;
                            let j = j0 + dj;
                            let k = k0 + dk;
                            if i < 0
                                || j < 0
                                || k < 0
                                || i >= nx as isize
                                || j >= ny as isize
                                || k >= nz as isize
                            {
                                continue;
                            }
                            let w = cubic_bspline(x - i as f64)
                                * cubic_bspline(y - j as f64)
                                * cubic_bspline(z - k as f64);
                            acc += w * vol.data[idx3d(i as usize, j as usize, k as usize, nx, ny)];
                            weight_sum += w;
                        }
                    }
                }
                if weight_sum > 0.0 {
                    acc / weight_sum
                } else {
                    0.0
                }
            }
        }
    }
}

/// Component-wise spacing equality within floating tolerance.
pub fn spacing_matches(a: (f64, f64, f64), b: (f64, f64, f64)) -> bool {
    (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9 && (a.2 - b.2).abs() < 1e-9
}

/// Resample a volume to the target voxel spacing.
///
/// The output grid spans the same physical extent (dimensions scaled by the
/// spacing ratio, at least 1 voxel); the affine columns are rescaled so
/// physical coordinates are preserved. When the spacing already matches the
/// target this is a no-op returning a copy of the input grid.
pub fn resample_to_spacing(
    vol: &Volume,
    target: (f64, f64, f64),
    interp: Interpolator,
) -> Volume {
    if spacing_matches(vol.spacing, target) {
        return vol.clone();
    }

    let (nx, ny, nz) = vol.dims;
    let ratio = (
        target.0 / vol.spacing.0,
        target.1 / vol.spacing.1,
        target.2 / vol.spacing.2,
    );
    let out_dims = (
        ((nx as f64 / ratio.0).round() as usize).max(1),
        ((ny as f64 / ratio.1).round() as usize).max(1),
        ((nz as f64 / ratio.2).round() as usize).max(1),
    );

    let mut data = Vec::with_capacity(out_dims.0 * out_dims.1 * out_dims.2);
    for k in 0..out_dims.2 {
        for j in 0..out_dims.1 {
            for i in 0..out_dims.0 {
                let x = i as f64 * ratio.0;
                let y = j as f64 * ratio.1;
                let z = k as f64 * ratio.2;
                data.push(interp.sample(vol, x, y, z));
            }
        }
    }

    // Rescale affine columns by the spacing ratio; the translation column
    // is untouched because index 0 still maps to the same physical point.
    let mut affine = vol.affine;
    let ratios = [ratio.0, ratio.1, ratio.2];
    for (c, r) in ratios.iter().enumerate() {
        for row in 0..3 {
            affine[row * 4 + c] *= r;
        }
    }

    Volume {
        data,
        dims: out_dims,
        spacing: target,
        affine,
    }
}
