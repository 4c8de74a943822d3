//! Rigid/affine registration stage
//!
//! Registers a moving image to a fixed template: optional rigid
//! prealignment, then the requested transform class seeded by the rigid
//! result, composed into a single forward warp and applied once against the
//! template's grid with the B-spline interpolator.
//!
//! The optimizer is a deterministic multi-resolution step-halving parameter
//! search over a mean-squared-difference metric; no randomness is involved,
//! so repeated runs produce identical transforms.

pub mod transform;

use std::str::FromStr;

use tracing::{debug, info};

use crate::errors::{NormError, Result};
use crate::nifti_io::{idx3d, Volume};
use crate::preprocess::Interpolator;

/// Transform classes the registration stage can solve for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// 6-DOF: translation + rotation.
    Rigid,
    /// 12-DOF: translation + rotation + scale + shear.
    Affine,
}

impl FromStr for TransformKind {
    type Err = NormError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rigid" => Ok(TransformKind::Rigid),
            "affine" => Ok(TransformKind::Affine),
            other => Err(NormError::input(format!(
                "unknown registration transform '{}' (expected Rigid or Affine)",
                other
            ))),
        }
    }
}

impl TransformKind {
    /// Parameters of the identity transform for this class.
    fn identity_params(&self) -> Vec<f64> {
        match self {
            TransformKind::Rigid => vec![0.0; 6],
            TransformKind::Affine => {
                vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]
            }
        }
    }

    /// Build the transform matrix for this class.
    fn matrix(&self, params: &[f64], center: (f64, f64, f64)) -> [f64; 16] {
        match self {
            TransformKind::Rigid => transform::rigid(params, center),
            TransformKind::Affine => transform::affine(params, center),
        }
    }

    /// Initial optimizer step per parameter, scaled by the resolution level.
    fn initial_steps(&self, trans_step: f64, scale: f64) -> Vec<f64> {
        let t = trans_step * scale;
        let r = 0.05 * scale;
        match self {
            TransformKind::Rigid => vec![t, t, t, r, r, r],
            TransformKind::Affine => {
                let s = 0.02 * scale;
                vec![t, t, t, r, r, r, s, s, s, s, s, s]
            }
        }
    }
}

/// Registration configuration.
#[derive(Debug, Clone)]
pub struct RegisterOpts {
    /// Transform class solved in the main stage.
    pub kind: TransformKind,
    /// Run a rigid-only stage first and seed the main stage with it.
    pub rigid_prealign: bool,
}

impl Default for RegisterOpts {
    fn default() -> Self {
        RegisterOpts {
            kind: TransformKind::Affine,
            rigid_prealign: true,
        }
    }
}

/// Fixed-grid subsampling strides, coarse to fine.
const LEVEL_STRIDES: [usize; 2] = [4, 2];
/// Maximum optimizer sweeps per resolution level.
const MAX_SWEEPS: usize = 60;
/// A level stops once every step shrank below initial/STEP_SHRINK_LIMIT.
const STEP_SHRINK_LIMIT: f64 = 64.0;

/// Physical coordinate of the grid center.
fn grid_center(vol: &Volume) -> (f64, f64, f64) {
    let c = (
        (vol.dims.0 as f64 - 1.0) / 2.0,
        (vol.dims.1 as f64 - 1.0) / 2.0,
        (vol.dims.2 as f64 - 1.0) / 2.0,
    );
    transform::apply(&vol.affine, c)
}

/// Mean squared difference between the fixed image and the warped moving
/// image, sampled on the fixed grid with the given stride.
///
/// `warp` maps fixed physical points into the moving physical space;
/// `inv_moving` is the moving volume's inverse affine. Points that land
/// outside the moving volume sample as background, which penalizes
/// non-overlap and pulls the optimizer toward alignment.
fn mse_cost(
    fixed: &Volume,
    moving: &Volume,
    warp: &[f64; 16],
    inv_moving: &[f64; 16],
    stride: usize,
) -> f64 {
    let (nx, ny, nz) = fixed.dims;
    let mut acc = 0.0;
    let mut count = 0usize;
    for k in (0..nz).step_by(stride) {
        for j in (0..ny).step_by(stride) {
            for i in (0..nx).step_by(stride) {
                let p = transform::apply(&fixed.affine, (i as f64, j as f64, k as f64));
                let q = transform::apply(warp, p);
                let (mx, my, mz) = transform::apply(inv_moving, q);
                let sampled = Interpolator::Linear.sample(moving, mx, my, mz);
                let diff = fixed.data[idx3d(i, j, k, nx, ny)] - sampled;
                acc += diff * diff;
                count += 1;
            }
        }
    }
    if count == 0 {
        f64::INFINITY
    } else {
        acc / count as f64
    }
}

/// Step-halving parameter search for one transform class.
///
/// `pre` is the composed initializer applied before the solved transform;
/// the returned parameters are the solved class's, about the fixed grid
/// center.
fn optimize(
    fixed: &Volume,
    moving: &Volume,
    kind: TransformKind,
    pre: &[f64; 16],
    mut params: Vec<f64>,
) -> Result<Vec<f64>> {
    let center = grid_center(fixed);
    let inv_moving = transform::invert(&moving.affine)?;
    let max_spacing = fixed.spacing.0.max(fixed.spacing.1).max(fixed.spacing.2);

    for (level, &stride) in LEVEL_STRIDES.iter().enumerate() {
        let mut steps = kind.initial_steps(max_spacing, stride as f64);
        let floors: Vec<f64> = steps.iter().map(|s| s / STEP_SHRINK_LIMIT).collect();

        let cost = |p: &[f64]| {
            let warp = transform::compose(&kind.matrix(p, center), pre);
            mse_cost(fixed, moving, &warp, &inv_moving, stride)
        };
        let mut best = cost(&params);

        for sweep in 0..MAX_SWEEPS {
            let mut improved = false;
            for p in 0..params.len() {
                for dir in [1.0, -1.0] {
                    let mut trial = params.clone();
                    trial[p] += dir * steps[p];
                    let c = cost(&trial);
                    if c + 1e-12 < best {
                        best = c;
                        params = trial;
                        improved = true;
                        break;
                    }
                }
            }
            if !improved {
                for s in steps.iter_mut() {
                    *s *= 0.5;
                }
                if steps.iter().zip(floors.iter()).all(|(s, f)| s < f) {
                    debug!(
                        "level {} converged after {} sweeps (cost {:.6})",
                        level, sweep, best
                    );
                    break;
                }
            }
        }
    }
    Ok(params)
}

/// Resample `moving` onto `fixed`'s grid through the forward warp.
pub fn apply_transform(
    moving: &Volume,
    fixed: &Volume,
    warp: &[f64; 16],
    interp: Interpolator,
) -> Result<Volume> {
    let inv_moving = transform::invert(&moving.affine)?;
    let (nx, ny, nz) = fixed.dims;
    let mut data = Vec::with_capacity(fixed.len());
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let p = transform::apply(&fixed.affine, (i as f64, j as f64, k as f64));
                let q = transform::apply(warp, p);
                let (mx, my, mz) = transform::apply(&inv_moving, q);
                data.push(interp.sample(moving, mx, my, mz));
            }
        }
    }
    Ok(Volume {
        data,
        dims: fixed.dims,
        spacing: fixed.spacing,
        affine: fixed.affine,
    })
}

/// Register `moving` to the `fixed` template.
///
/// With `rigid_prealign`, a rigid-only stage runs first and its forward
/// transform initializes the requested class; the two forward transforms
/// are composed into a single warp. The warped image lives on the fixed
/// template's grid and is sampled with the B-spline interpolator.
pub fn register(moving: &Volume, fixed: &Volume, opts: &RegisterOpts) -> Result<Volume> {
    if moving.is_empty() || fixed.is_empty() {
        return Err(NormError::registration("cannot register empty volumes"));
    }

    // Start from grid centers aligned; without prealignment this is the
    // only initialization the main stage gets.
    let cf = grid_center(fixed);
    let cm = grid_center(moving);
    let center_shift = (cm.0 - cf.0, cm.1 - cf.1, cm.2 - cf.2);

    let pre = if opts.rigid_prealign {
        let init = vec![center_shift.0, center_shift.1, center_shift.2, 0.0, 0.0, 0.0];
        let params = optimize(fixed, moving, TransformKind::Rigid, &transform::identity(), init)?;
        debug!("rigid prealignment parameters: {:?}", params);
        TransformKind::Rigid.matrix(&params, cf)
    } else {
        transform::translation(center_shift)
    };

    let params = optimize(fixed, moving, opts.kind, &pre, opts.kind.identity_params())?;
    let warp = transform::compose(&opts.kind.matrix(&params, cf), &pre);
    info!("registration solved ({:?})", opts.kind);

    apply_transform(moving, fixed, &warp, Interpolator::BSpline)
}
