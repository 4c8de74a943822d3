//! Error types for the normalization pipeline
//!
//! One structured error enum covers the whole crate: pre-flight cohort
//! validation, normalization math, geometry checks, and capability-level
//! failures from I/O and registration.

use thiserror::Error;

/// Main error type for normalization operations.
#[derive(Error, Debug)]
pub enum NormError {
    /// Parallel input collections disagree in length (or the primary is empty).
    /// Raised before any image is read; aborts the whole batch.
    #[error("input collections must be in correspondence and non-empty ({expected} != {actual})")]
    Correspondence { expected: usize, actual: usize },

    /// The masked region does not contain enough distinct intensity levels
    /// to form the requested number of tissue classes.
    #[error("masked region has {distinct} distinct intensities, cannot form {classes} tissue classes")]
    DegenerateRegion { distinct: usize, classes: usize },

    /// The tissue mask selects no voxels.
    #[error("tissue mask selects no voxels")]
    EmptyMask,

    /// The tissue-mean intensity is not positive, so the rescale is undefined.
    #[error("tissue mean intensity {0} is not positive; normalization undefined")]
    NonPositiveMean(f64),

    /// An image and its mask do not share a voxel grid.
    #[error("voxel grids do not match: {expected:?} vs {actual:?}")]
    GridMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    /// Orientation code is not one of the 48 valid axis-sign permutations.
    #[error("invalid orientation code '{0}'")]
    InvalidOrientation(String),

    /// Invalid user input (argument combinations, missing prerequisites).
    #[error("{0}")]
    Input(String),

    /// NIfTI read/write failure.
    #[error("NIfTI error: {0}")]
    Nifti(String),

    /// Registration failure (degenerate overlap, singular transform).
    #[error("registration error: {0}")]
    Registration(String),

    /// Filesystem failure other than an already-existing output directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Batch summary: some subjects failed after per-subject isolation.
    #[error("{failed} of {total} subjects failed")]
    SubjectFailures { failed: usize, total: usize },
}

/// Result type for normalization operations.
pub type Result<T> = std::result::Result<T, NormError>;

impl NormError {
    /// Create an invalid-input error.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Create a NIfTI error.
    pub fn nifti(msg: impl Into<String>) -> Self {
        Self::Nifti(msg.into())
    }

    /// Create a registration error.
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }
}
