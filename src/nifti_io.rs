//! NIfTI file I/O and the in-memory volume type
//!
//! Volumes are held as flat `f64` buffers in Fortran (column-major) order to
//! match the NIfTI convention: index = x + y*nx + z*nx*ny. Both `.nii` and
//! `.nii.gz` files are supported (gzip is auto-detected on read, chosen by
//! extension on write).

use std::io::Cursor;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::errors::{NormError, Result};

/// Index into a 3D volume (Fortran/column-major order)
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// A 3-D volumetric image with physical metadata.
///
/// The affine is a row-major 4x4 matrix mapping voxel indices to physical
/// coordinates; intensity-only operations pass it through unmodified.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Voxel intensities, Fortran order.
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz).
    pub dims: (usize, usize, usize),
    /// Voxel spacing in mm along each axis. Strictly positive.
    pub spacing: (f64, f64, f64),
    /// Voxel-to-physical affine (4x4, row-major).
    pub affine: [f64; 16],
}

impl Volume {
    /// Total number of voxels.
    pub fn len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Whether the volume has no voxels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A volume with the same grid and metadata but new voxel data.
    ///
    /// Panics if `data` does not match the voxel count; callers always build
    /// the buffer from this volume's own dimensions.
    pub fn with_data(&self, data: Vec<f64>) -> Volume {
        assert_eq!(data.len(), self.len(), "voxel count mismatch");
        Volume {
            data,
            dims: self.dims,
            spacing: self.spacing,
            affine: self.affine,
        }
    }

    /// The 3-letter orientation code implied by the affine.
    pub fn orientation(&self) -> String {
        crate::orientation::code_from_affine(&self.affine)
    }

    /// Check that `other` shares this volume's voxel grid.
    pub fn check_same_grid(&self, other: &Volume) -> Result<()> {
        if self.dims != other.dims {
            return Err(NormError::GridMismatch {
                expected: self.dims,
                actual: other.dims,
            });
        }
        Ok(())
    }

    /// Mean intensity over voxels where `mask` is positive.
    ///
    /// Returns `None` when the mask selects no voxels.
    pub fn mean_where(&self, mask: &Volume) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (v, m) in self.data.iter().zip(mask.data.iter()) {
            if *m > 0.0 {
                sum += v;
                count += 1;
            }
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Voxel-to-physical affine from a NIfTI header.
///
/// Prefers the sform when present, otherwise falls back to a diagonal
/// affine built from the voxel spacing.
fn affine_from_header(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Load a volume from raw NIfTI bytes (gzip auto-detected).
///
/// Applies the header's scaling slope/intercept, so the returned intensities
/// are in physical units. 4-D inputs keep only the first timepoint.
pub fn load_volume(bytes: &[u8]) -> Result<Volume> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        InMemNiftiObject::from_reader(decoder)
            .map_err(|e| NormError::nifti(format!("failed to read gzipped NIfTI: {}", e)))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| NormError::nifti(format!("failed to read NIfTI: {}", e)))?
    };

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(NormError::nifti(format!(
            "expected at least a 3D volume, got {}D",
            ndim
        )));
    }

    let pixdim = header.pixdim;
    let spacing = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    if spacing.0 <= 0.0 || spacing.1 <= 0.0 || spacing.2 <= 0.0 {
        return Err(NormError::nifti(format!(
            "non-positive voxel spacing {:?}",
            spacing
        )));
    }

    let scl_slope = if header.scl_slope == 0.0 {
        1.0
    } else {
        header.scl_slope as f64
    };
    let scl_inter = header.scl_inter as f64;
    let affine = affine_from_header(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| NormError::nifti(format!("failed to convert volume to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(NormError::nifti(format!(
            "expected at least a 3D array, got {}D",
            shape.len()
        )));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);

    // Flatten in Fortran order; 4D inputs keep the first timepoint.
    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let raw = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    array[[i, j, k, 0]]
                };
                data.push(raw * scl_slope + scl_inter);
            }
        }
    }

    Ok(Volume {
        data,
        dims: (nx, ny, nz),
        spacing,
        affine,
    })
}

/// Read a volume from a filesystem path (`.nii` or `.nii.gz`).
pub fn read_volume(path: &Path) -> Result<Volume> {
    let bytes = std::fs::read(path)
        .map_err(|e| NormError::nifti(format!("failed to read '{}': {}", path.display(), e)))?;
    load_volume(&bytes)
}

/// Serialize a volume as uncompressed NIfTI-1 bytes (float32, sform affine).
pub fn volume_to_bytes(vol: &Volume) -> Vec<u8> {
    let (nx, ny, nz) = vol.dims;
    let (vsx, vsy, vsz) = vol.spacing;

    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    // pixdim[0..7]
    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 byte extension), identity scaling
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat) with srow_x/y/z from the affine
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    for r in 0..3 {
        for c in 0..4 {
            let offset = 280 + r * 16 + c * 4;
            let val = vol.affine[r * 4 + c] as f32;
            header[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
        }
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + vol.data.len() * 4);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]); // no extensions
    for &val in &vol.data {
        buffer.extend_from_slice(&(val as f32).to_le_bytes());
    }
    buffer
}

/// Write a volume to a file.
///
/// Paths ending in `.nii.gz` are gzip compressed; anything else is written
/// as uncompressed `.nii`.
pub fn write_volume(path: &Path, vol: &Volume) -> Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let raw = volume_to_bytes(vol);
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|e| NormError::nifti(format!("gzip compression failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| NormError::nifti(format!("gzip finish failed: {}", e)))?
    } else {
        raw
    };

    std::fs::write(path, &bytes)
        .map_err(|e| NormError::nifti(format!("failed to write '{}': {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_volume(dims: (usize, usize, usize)) -> Volume {
        let n = dims.0 * dims.1 * dims.2;
        Volume {
            data: (0..n).map(|i| i as f64 * 0.5 + 1.0).collect(),
            dims,
            spacing: (1.0, 2.0, 3.0),
            affine: [
                1.0, 0.0, 0.0, 10.0,
                0.0, 2.0, 0.0, 20.0,
                0.0, 0.0, 3.0, 30.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        }
    }

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x00]));
        assert!(!is_gzip(&[0x00, 0x00, 0x00]));
        assert!(!is_gzip(&[0x1f])); // Too short
    }

    #[test]
    fn test_affine_fallback_identity() {
        let mut header = NiftiHeader::default();
        header.pixdim[1] = 1.0;
        header.pixdim[2] = 2.0;
        header.pixdim[3] = 3.0;
        header.sform_code = 0;

        let affine = affine_from_header(&header);
        assert_eq!(affine[0], 1.0);
        assert_eq!(affine[5], 2.0);
        assert_eq!(affine[10], 3.0);
    }

    #[test]
    fn test_affine_sform() {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [1.0, 0.0, 0.0, 10.0];
        header.srow_y = [0.0, 2.0, 0.0, 20.0];
        header.srow_z = [0.0, 0.0, 3.0, 30.0];

        let affine = affine_from_header(&header);
        assert_eq!(affine[0], 1.0);
        assert_eq!(affine[3], 10.0);
        assert_eq!(affine[5], 2.0);
        assert_eq!(affine[11], 30.0);
        assert_eq!(affine[15], 1.0);
    }

    #[test]
    fn test_volume_bytes_header() {
        let vol = test_volume((2, 2, 2));
        let bytes = volume_to_bytes(&vol);

        assert_eq!(bytes.len(), 352 + 8 * 4);
        assert_eq!(&bytes[344..348], b"n+1\0");

        let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(sizeof_hdr, 348);

        let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);
        assert_eq!(datatype, 16);

        let sform_code = i16::from_le_bytes([bytes[254], bytes[255]]);
        assert_eq!(sform_code, 1);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let vol = test_volume((4, 4, 4));
        let tmp_path = std::env::temp_dir().join("norm_core_roundtrip.nii");

        write_volume(&tmp_path, &vol).unwrap();
        let loaded = read_volume(&tmp_path).unwrap();

        assert_eq!(loaded.dims, vol.dims);
        assert!((loaded.spacing.0 - vol.spacing.0).abs() < 1e-5);
        assert!((loaded.spacing.1 - vol.spacing.1).abs() < 1e-5);
        assert!((loaded.spacing.2 - vol.spacing.2).abs() < 1e-5);

        // Data is stored as f32, so expect f32-level precision.
        for (a, b) in loaded.data.iter().zip(vol.data.iter()) {
            assert!((a - b).abs() < 0.01, "roundtrip mismatch: {} vs {}", a, b);
        }
        for (a, b) in loaded.affine.iter().zip(vol.affine.iter()) {
            assert!((a - b).abs() < 0.01, "affine mismatch: {} vs {}", a, b);
        }

        std::fs::remove_file(&tmp_path).ok();
    }

    #[test]
    fn test_write_read_roundtrip_gz() {
        let vol = test_volume((4, 4, 4));
        let tmp_path = std::env::temp_dir().join("norm_core_roundtrip.nii.gz");

        write_volume(&tmp_path, &vol).unwrap();
        let bytes = std::fs::read(&tmp_path).unwrap();
        assert!(is_gzip(&bytes), "expected gzip output for .nii.gz");

        let loaded = read_volume(&tmp_path).unwrap();
        assert_eq!(loaded.dims, vol.dims);

        std::fs::remove_file(&tmp_path).ok();
    }

    #[test]
    fn test_load_invalid_bytes() {
        assert!(load_volume(&[0u8; 10]).is_err());
        assert!(load_volume(&[0x1f, 0x8b, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_read_nonexistent_file() {
        let result = read_volume(Path::new("/tmp/norm_core_no_such_file.nii"));
        assert!(matches!(result, Err(NormError::Nifti(_))));
    }

    #[test]
    fn test_mean_where() {
        let vol = test_volume((2, 2, 2));
        let mut mask = vol.with_data(vec![0.0; 8]);
        assert_eq!(vol.mean_where(&mask), None);

        mask.data[0] = 1.0;
        mask.data[1] = 1.0;
        let mean = vol.mean_where(&mask).unwrap();
        assert!((mean - (vol.data[0] + vol.data[1]) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_check_same_grid() {
        let a = test_volume((2, 2, 2));
        let b = test_volume((2, 2, 3));
        assert!(a.check_same_grid(&a.clone()).is_ok());
        assert!(matches!(
            a.check_same_grid(&b),
            Err(NormError::GridMismatch { .. })
        ));
    }
}
