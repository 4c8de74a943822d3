//! Canonical orientation handling
//!
//! Orientation is expressed as a 3-letter axis code, one letter per voxel
//! axis, naming the anatomical direction the axis points toward: R/L
//! (right/left), A/P (anterior/posterior), S/I (superior/inferior). "RAS"
//! means axis 0 points right, axis 1 anterior, axis 2 superior. There are
//! 48 valid codes (6 axis orders, 8 sign patterns).
//!
//! The code of a volume is derived from its affine, so reorientation only
//! has one source of truth to keep consistent.

use crate::errors::{NormError, Result};
use crate::nifti_io::{idx3d, Volume};

/// Letter for an anatomical axis and sign (positive, negative).
const LETTERS: [[char; 2]; 3] = [['R', 'L'], ['A', 'P'], ['S', 'I']];

/// Parse a single code letter into (anatomical axis, sign).
fn parse_letter(c: char) -> Option<(usize, f64)> {
    match c.to_ascii_uppercase() {
        'R' => Some((0, 1.0)),
        'L' => Some((0, -1.0)),
        'A' => Some((1, 1.0)),
        'P' => Some((1, -1.0)),
        'S' => Some((2, 1.0)),
        'I' => Some((2, -1.0)),
        _ => None,
    }
}

/// Parse a 3-letter orientation code into per-axis (anatomical axis, sign).
///
/// Fails unless the three letters name three distinct anatomical axes.
pub fn parse_code(code: &str) -> Result<[(usize, f64); 3]> {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() != 3 {
        return Err(NormError::InvalidOrientation(code.to_string()));
    }
    let mut axes = [(0usize, 0.0f64); 3];
    let mut seen = [false; 3];
    for (i, &c) in chars.iter().enumerate() {
        let (axis, sign) =
            parse_letter(c).ok_or_else(|| NormError::InvalidOrientation(code.to_string()))?;
        if seen[axis] {
            return Err(NormError::InvalidOrientation(code.to_string()));
        }
        seen[axis] = true;
        axes[i] = (axis, sign);
    }
    Ok(axes)
}

/// Per-voxel-axis (anatomical axis, sign) implied by an affine.
///
/// Each affine column is assigned the anatomical axis it is most aligned
/// with; assignment is greedy by dominance so the result is always a valid
/// permutation, even for oblique affines.
fn axes_from_affine(affine: &[f64; 16]) -> [(usize, f64); 3] {
    let col = |i: usize| [affine[i], affine[4 + i], affine[8 + i]];

    // Most-dominant columns claim their anatomical axis first.
    let mut order = [0usize, 1, 2];
    let dominance = |i: usize| col(i).iter().fold(0.0f64, |a, &b| a.max(b.abs()));
    order.sort_by(|&a, &b| {
        dominance(b)
            .partial_cmp(&dominance(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut taken = [false; 3];
    let mut axes = [(0usize, 0.0f64); 3];
    for &i in &order {
        let c = col(i);
        let mut best = usize::MAX;
        let mut best_abs = -1.0;
        for (r, taken_r) in taken.iter().enumerate() {
            if !taken_r && c[r].abs() > best_abs {
                best = r;
                best_abs = c[r].abs();
            }
        }
        taken[best] = true;
        axes[i] = (best, if c[best] < 0.0 { -1.0 } else { 1.0 });
    }
    axes
}

/// The 3-letter orientation code implied by an affine.
pub fn code_from_affine(affine: &[f64; 16]) -> String {
    axes_from_affine(affine)
        .iter()
        .map(|&(axis, sign)| LETTERS[axis][if sign < 0.0 { 1 } else { 0 }])
        .collect()
}

/// Reorient a volume to the given axis code.
///
/// Pure axis permutation and flipping: voxel values are moved, never
/// interpolated, so the same routine serves images and masks alike. The
/// affine is updated so physical coordinates are preserved. A volume
/// already in the requested orientation is returned unchanged.
pub fn reorient(vol: &Volume, code: &str) -> Result<Volume> {
    let target = parse_code(code)?;
    let current = axes_from_affine(&vol.affine);
    let dims = [vol.dims.0, vol.dims.1, vol.dims.2];
    let spacing = [vol.spacing.0, vol.spacing.1, vol.spacing.2];

    // For each output axis: which input axis supplies it, and flipped or not.
    let mut perm = [0usize; 3];
    let mut flip = [false; 3];
    for j in 0..3 {
        let (t_axis, t_sign) = target[j];
        let i = (0..3)
            .find(|&i| current[i].0 == t_axis)
            .expect("axes_from_affine yields a permutation");
        perm[j] = i;
        flip[j] = current[i].1 * t_sign < 0.0;
    }

    if perm == [0, 1, 2] && !flip.iter().any(|&f| f) {
        return Ok(vol.clone());
    }

    let out_dims = (dims[perm[0]], dims[perm[1]], dims[perm[2]]);
    let out_spacing = (spacing[perm[0]], spacing[perm[1]], spacing[perm[2]]);

    // New affine: permuted (and possibly negated) columns; flipped axes
    // shift the translation to the other end of the axis.
    let mut affine = [0.0f64; 16];
    affine[15] = 1.0;
    for r in 0..3 {
        affine[r * 4 + 3] = vol.affine[r * 4 + 3];
    }
    for j in 0..3 {
        let i = perm[j];
        let s = if flip[j] { -1.0 } else { 1.0 };
        for r in 0..3 {
            affine[r * 4 + j] = s * vol.affine[r * 4 + i];
        }
        if flip[j] {
            for r in 0..3 {
                affine[r * 4 + 3] += vol.affine[r * 4 + i] * (dims[i] as f64 - 1.0);
            }
        }
    }

    let (nx, ny, _) = vol.dims;
    let mut data = vec![0.0f64; vol.len()];
    for z in 0..out_dims.2 {
        for y in 0..out_dims.1 {
            for x in 0..out_dims.0 {
                let out = [x, y, z];
                let mut src = [0usize; 3];
                for j in 0..3 {
                    let i = perm[j];
                    src[i] = if flip[j] { dims[i] - 1 - out[j] } else { out[j] };
                }
                data[idx3d(x, y, z, out_dims.0, out_dims.1)] =
                    vol.data[idx3d(src[0], src[1], src[2], nx, ny)];
            }
        }
    }

    Ok(Volume {
        data,
        dims: out_dims,
        spacing: out_spacing,
        affine,
    })
}
