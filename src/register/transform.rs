//! Linear spatial transforms as row-major 4x4 matrices
//!
//! All transforms map physical points to physical points. Rigid and affine
//! transforms are parameterized about a rotation center so the optimizer's
//! rotation steps do not drag the volume away from the metric overlap.

use crate::errors::{NormError, Result};

/// The 4x4 identity transform.
pub fn identity() -> [f64; 16] {
    [
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// A pure translation transform.
pub fn translation(t: (f64, f64, f64)) -> [f64; 16] {
    let mut m = identity();
    m[3] = t.0;
    m[7] = t.1;
    m[11] = t.2;
    m
}

/// Compose two transforms: `compose(a, b)` applies `b` first, then `a`.
pub fn compose(a: &[f64; 16], b: &[f64; 16]) -> [f64; 16] {
    let mut out = [0.0f64; 16];
    for r in 0..4 {
        for c in 0..4 {
            let mut acc = 0.0;
            for k in 0..4 {
                acc += a[r * 4 + k] * b[k * 4 + c];
            }
            out[r * 4 + c] = acc;
        }
    }
    out
}

/// Apply a transform to a physical point.
pub fn apply(m: &[f64; 16], p: (f64, f64, f64)) -> (f64, f64, f64) {
    (
        m[0] * p.0 + m[1] * p.1 + m[2] * p.2 + m[3],
        m[4] * p.0 + m[5] * p.1 + m[6] * p.2 + m[7],
        m[8] * p.0 + m[9] * p.1 + m[10] * p.2 + m[11],
    )
}

/// Invert a transform by Gauss-Jordan elimination.
pub fn invert(m: &[f64; 16]) -> Result<[f64; 16]> {
    let mut a = *m;
    let mut inv = identity();

    for col in 0..4 {
        // Partial pivot
        let mut pivot = col;
        for row in (col + 1)..4 {
            if a[row * 4 + col].abs() > a[pivot * 4 + col].abs() {
                pivot = row;
            }
        }
        if a[pivot * 4 + col].abs() < 1e-12 {
            return Err(NormError::registration("singular transform"));
        }
        if pivot != col {
            for k in 0..4 {
                a.swap(col * 4 + k, pivot * 4 + k);
                inv.swap(col * 4 + k, pivot * 4 + k);
            }
        }

        let diag = a[col * 4 + col];
        for k in 0..4 {
            a[col * 4 + k] /= diag;
            inv[col * 4 + k] /= diag;
        }
        for row in 0..4 {
            if row == col {
                continue;
            }
            let factor = a[row * 4 + col];
            if factor != 0.0 {
                for k in 0..4 {
                    a[row * 4 + k] -= factor * a[col * 4 + k];
                    inv[row * 4 + k] -= factor * inv[col * 4 + k];
                }
            }
        }
    }
    Ok(inv)
}

/// 3x3 rotation from Euler angles (applied x, then y, then z).
fn rotation(rx: f64, ry: f64, rz: f64) -> [[f64; 3]; 3] {
    let (sx, cx) = rx.sin_cos();
    let (sy, cy) = ry.sin_cos();
    let (sz, cz) = rz.sin_cos();

    // Rz * Ry * Rx
    [
        [cz * cy, cz * sy * sx - sz * cx, cz * sy * cx + sz * sx],
        [sz * cy, sz * sy * sx + cz * cx, sz * sy * cx - cz * sx],
        [-sy, cy * sx, cy * cx],
    ]
}

/// Build the full matrix for a linear part applied about `center` with an
/// extra translation `t`: T(p) = L*(p - c) + c + t.
fn about_center(linear: [[f64; 3]; 3], t: (f64, f64, f64), center: (f64, f64, f64)) -> [f64; 16] {
    let c = [center.0, center.1, center.2];
    let tv = [t.0, t.1, t.2];
    let mut m = identity();
    for r in 0..3 {
        let mut shift = c[r] + tv[r];
        for k in 0..3 {
            m[r * 4 + k] = linear[r][k];
            shift -= linear[r][k] * c[k];
        }
        m[r * 4 + 3] = shift;
    }
    m
}

/// Rigid transform from 6 parameters: tx ty tz rx ry rz (radians).
pub fn rigid(params: &[f64], center: (f64, f64, f64)) -> [f64; 16] {
    debug_assert_eq!(params.len(), 6);
    let linear = rotation(params[3], params[4], params[5]);
    about_center(linear, (params[0], params[1], params[2]), center)
}

/// Affine transform from 12 parameters: the rigid 6, then scales
/// sx sy sz, then shears hxy hxz hyz. Linear part is R * H * S.
pub fn affine(params: &[f64], center: (f64, f64, f64)) -> [f64; 16] {
    debug_assert_eq!(params.len(), 12);
    let r = rotation(params[3], params[4], params[5]);
    let (sx, sy, sz) = (params[6], params[7], params[8]);
    let (hxy, hxz, hyz) = (params[9], params[10], params[11]);

    // H * S with H upper-triangular unit shear
    let hs = [
        [sx, hxy * sy, hxz * sz],
        [0.0, sy, hyz * sz],
        [0.0, 0.0, sz],
    ];
    let mut linear = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                linear[i][j] += r[i][k] * hs[k][j];
            }
        }
    }
    about_center(linear, (params[0], params[1], params[2]), center)
}
