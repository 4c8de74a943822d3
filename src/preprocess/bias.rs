//! Bias-field correction
//!
//! Iterative multiplicative intensity-inhomogeneity correction. The bias
//! field is estimated in log space as the low-frequency content left in the
//! (progressively corrected) image, one smoothing scale per resolution
//! level, until the residual drops below the convergence tolerance.
//! Smoothing uses a box-filter Gaussian approximation (three box passes per
//! axis), optionally weighted by a spatial prior mask.

use std::collections::VecDeque;

use tracing::debug;

use crate::errors::{NormError, Result};
use crate::nifti_io::{idx3d, Volume};

/// Convergence configuration for the bias-field correction.
///
/// `iters` holds the maximum iteration count for each resolution level,
/// coarse to fine; `tol` is the RMS log-residual below which a level stops
/// early.
#[derive(Debug, Clone)]
pub struct BiasOpts {
    /// Maximum iterations per resolution level.
    pub iters: Vec<usize>,
    /// Convergence tolerance on the RMS log-domain residual.
    pub tol: f64,
}

impl Default for BiasOpts {
    fn default() -> Self {
        BiasOpts {
            iters: vec![200, 200, 200, 200],
            tol: 0.0005,
        }
    }
}

/// Calculate box sizes to approximate a Gaussian of the given sigma with n
/// box filter passes.
fn get_box_sizes(sigma: f64, n: usize) -> Vec<usize> {
    if sigma <= 0.0 || n == 0 {
        return vec![0; n];
    }

    // wideal = sqrt((12*sigma^2 / n) + 1)
    let wideal = ((12.0 * sigma * sigma / n as f64) + 1.0).sqrt();

    // wl = next lower odd integer
    let wl_float = wideal - (wideal + 1.0) % 2.0;
    let wl = wl_float.round() as usize;
    let wl = if wl % 2 == 0 { wl + 1 } else { wl };
    let wu = wl + 2;

    let wl_f = wl as f64;
    let n_f = n as f64;
    let mideal = (12.0 * sigma * sigma - n_f * wl_f * wl_f - 4.0 * n_f * wl_f - 3.0 * n_f)
        / (-4.0 * wl_f - 4.0);
    let m = mideal.round() as usize;

    (0..n).map(|i| if i < m { wl } else { wu }).collect()
}

/// Clamp a box size to the image extent along one axis (odd, at most half
/// the extent).
fn clamp_box(boxsize: usize, dim: usize) -> usize {
    let b = if boxsize % 2 == 0 { boxsize + 1 } else { boxsize };
    let max_size = dim / 2;
    if b > max_size {
        if max_size % 2 == 0 {
            max_size + 1
        } else {
            max_size
        }
    } else {
        b
    }
}

/// 1D box filter on a line (in-place).
///
/// Uses a running sum; the window grows and shrinks at the line ends.
fn box_filter_line(line: &mut [f64], boxsize: usize) {
    if boxsize < 3 || line.len() < boxsize {
        return;
    }

    let n = line.len();
    let r = boxsize / 2;

    let mut queue: VecDeque<f64> = VecDeque::with_capacity(boxsize);
    let mut lsum: f64 = line[..r].iter().sum();
    for &v in line.iter().take(r) {
        queue.push_back(v);
    }

    // Leading edge (growing window)
    for i in 0..=r {
        lsum += line[i + r];
        queue.push_back(line[i + r]);
        line[i] = lsum / (r + i + 1) as f64;
    }

    // Middle (full window)
    for i in (r + 1)..(n - r) {
        let old = queue.pop_front().unwrap();
        lsum += line[i + r] - old;
        queue.push_back(line[i + r]);
        line[i] = lsum / boxsize as f64;
    }

    // Trailing edge (shrinking window)
    for i in (n - r)..n {
        let old = queue.pop_front().unwrap();
        lsum -= old;
        line[i] = lsum / (r + n - i) as f64;
    }
}

/// Apply a 1D box filter along one axis of a 3D volume.
fn box_filter_axis(data: &mut [f64], dims: (usize, usize, usize), axis: usize, boxsize: usize) {
    let (nx, ny, nz) = dims;
    let (len, stride) = match axis {
        0 => (nx, 1),
        1 => (ny, nx),
        _ => (nz, nx * ny),
    };
    if boxsize < 3 || len < boxsize {
        return;
    }

    let mut buf = vec![0.0f64; len];
    let line_starts: Vec<usize> = match axis {
        0 => (0..nz)
            .flat_map(|k| (0..ny).map(move |j| idx3d(0, j, k, nx, ny)))
            .collect(),
        1 => (0..nz)
            .flat_map(|k| (0..nx).map(move |i| idx3d(i, 0, k, nx, ny)))
            .collect(),
        _ => (0..ny)
            .flat_map(|j| (0..nx).map(move |i| idx3d(i, j, 0, nx, ny)))
            .collect(),
    };

    for start in line_starts {
        for (t, slot) in buf.iter_mut().enumerate() {
            *slot = data[start + t * stride];
        }
        box_filter_line(&mut buf, boxsize);
        for (t, &v) in buf.iter().enumerate() {
            data[start + t * stride] = v;
        }
    }
}

/// Gaussian-approximate smoothing of a 3D buffer (three box passes per axis).
pub(crate) fn smooth3d(data: &[f64], dims: (usize, usize, usize), sigma: f64) -> Vec<f64> {
    let mut out = data.to_vec();
    let sizes = get_box_sizes(sigma, 3);
    let extents = [dims.0, dims.1, dims.2];
    for axis in 0..3 {
        for &s in &sizes {
            box_filter_axis(&mut out, dims, axis, clamp_box(s, extents[axis]));
        }
    }
    out
}

/// Weighted smoothing: smooth(x*w) / smooth(w), zero where the smoothed
/// weight vanishes.
fn smooth3d_weighted(
    data: &[f64],
    weight: &[f64],
    dims: (usize, usize, usize),
    sigma: f64,
) -> Vec<f64> {
    let weighted: Vec<f64> = data.iter().zip(weight).map(|(v, w)| v * w).collect();
    let num = smooth3d(&weighted, dims, sigma);
    let den = smooth3d(weight, dims, sigma);
    num.iter()
        .zip(den.iter())
        .map(|(n, d)| if *d > 1e-12 { n / d } else { 0.0 })
        .collect()
}

/// Smooth a binary mask into a soft spatial prior.
pub fn smooth_mask(mask: &Volume, sigma: f64) -> Volume {
    mask.with_data(smooth3d(&mask.data, mask.dims, sigma))
}

/// Correct the multiplicative bias field of an image.
///
/// When `weight` is given, the field estimate is driven by the weighted
/// region only (a smoothed brain mask works as a spatial prior for a second
/// correction pass). Voxels with non-positive intensity pass through
/// unchanged. The corrected image preserves the mean log-intensity of the
/// estimation domain, so the overall scale of the image is kept.
pub fn correct(image: &Volume, opts: &BiasOpts, weight: Option<&Volume>) -> Result<Volume> {
    if opts.iters.is_empty() {
        return Err(NormError::input(
            "bias correction needs at least one resolution level",
        ));
    }
    if let Some(w) = weight {
        image.check_same_grid(w)?;
    }

    let dims = image.dims;
    let n = image.len();

    // Estimation domain: positive intensities, weighted by the prior.
    let mut w: Vec<f64> = image
        .data
        .iter()
        .map(|&v| if v > 0.0 { 1.0 } else { 0.0 })
        .collect();
    if let Some(prior) = weight {
        for (wi, p) in w.iter_mut().zip(prior.data.iter()) {
            *wi *= p.max(0.0);
        }
    }
    let domain: f64 = w.iter().filter(|&&x| x > 0.0).count() as f64;
    if domain == 0.0 {
        return Ok(image.clone());
    }

    let log_img: Vec<f64> = image
        .data
        .iter()
        .map(|&v| if v > 0.0 { v.ln() } else { 0.0 })
        .collect();
    let mut log_bias = vec![0.0f64; n];

    let max_dim = dims.0.max(dims.1).max(dims.2);
    for (level, &max_iter) in opts.iters.iter().enumerate() {
        let sigma = (max_dim as f64 / 8.0 / 2f64.powi(level as i32)).max(2.0);
        for iter in 0..max_iter {
            let corrected: Vec<f64> = log_img
                .iter()
                .zip(log_bias.iter())
                .map(|(l, b)| l - b)
                .collect();
            let mut residual = smooth3d_weighted(&corrected, &w, dims, sigma);

            // Zero-mean over the domain so the intensity scale is preserved.
            let mut mean = 0.0;
            for (r, wi) in residual.iter().zip(w.iter()) {
                if *wi > 0.0 {
                    mean += r;
                }
            }
            mean /= domain;

            let mut rms = 0.0;
            for (r, wi) in residual.iter_mut().zip(w.iter()) {
                if *wi > 0.0 {
                    *r -= mean;
                    rms += *r * *r;
                } else {
                    *r = 0.0;
                }
            }
            let rms = (rms / domain).sqrt();

            for (b, r) in log_bias.iter_mut().zip(residual.iter()) {
                *b += r;
            }

            if rms < opts.tol {
                debug!(
                    "bias level {} converged after {} iterations (rms {:.2e})",
                    level,
                    iter + 1,
                    rms
                );
                break;
            }
        }
    }

    let data = image
        .data
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if v > 0.0 {
                (log_img[i] - log_bias[i]).exp()
            } else {
                v
            }
        })
        .collect();
    Ok(image.with_data(data))
}
