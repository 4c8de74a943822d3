//! norm-core: tissue-based intensity normalization for brain MR images
//!
//! This crate batch-processes cohorts of 3-D brain MRI volumes through
//! intensity normalization, geometric preprocessing, and rigid/affine
//! registration.
//!
//! # Modules
//! - `cohort`: deterministic directory listing and cohort correspondence
//! - `fcm`: fuzzy c-means tissue clustering and WM-referenced normalization
//! - `preprocess`: bias-field correction, resampling, reorientation
//! - `register`: rigid/affine registration to a template
//! - `pipeline`: batch orchestration over a cohort
//! - `nifti_io`: NIfTI read/write and the in-memory volume type
//! - `orientation`: 3-letter axis codes and reorientation

// Core data model and I/O
pub mod errors;
pub mod nifti_io;
pub mod orientation;

// Cohort handling
pub mod cohort;

// Pipeline stages
pub mod fcm;
pub mod preprocess;
pub mod register;

// Batch orchestration
pub mod pipeline;

pub use errors::{NormError, Result};
pub use nifti_io::Volume;
