//! Batch pipeline orchestration
//!
//! Sequences the normalization, preprocessing, and registration stages over
//! a cohort. Correspondence is validated before any image is read, output
//! directories are created idempotently, and the fcm workflow runs in two
//! phases with a hard barrier: every subject gets a WM mask before any
//! subject is normalized.
//!
//! Failure policy: fcm normalization and registration propagate the first
//! subject failure and abort the batch; preprocessing isolates per-subject
//! failures and reports a batch summary. Either way a failed batch exits
//! nonzero at the process boundary.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::cohort::{glob_nii, split_filename, Cohort, Subject};
use crate::errors::{NormError, Result};
use crate::fcm;
use crate::nifti_io::{read_volume, write_volume, Volume};
use crate::orientation;
use crate::preprocess::{preprocess, PreprocessOpts};
use crate::register::{self, RegisterOpts};

/// Progress of one subject through the two-phase fcm workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectStage {
    /// No WM mask yet.
    Pending,
    /// WM mask derived in Phase A or located from a supplied collection.
    MaskDerived,
    /// Normalized output written.
    Normalized,
    /// Processing stopped at this subject.
    Failed,
}

/// Outcome of one subject in a per-subject isolated batch.
#[derive(Debug)]
pub enum SubjectOutcome {
    /// The subject's primary output path.
    Success { subject: usize, output: PathBuf },
    /// The failure that stopped this subject (siblings kept running).
    Failure { subject: usize, error: NormError },
}

/// Result of a per-subject isolated batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// One outcome per subject, in correspondence order.
    pub outcomes: Vec<SubjectOutcome>,
}

impl BatchSummary {
    /// Number of subjects processed.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of failed subjects.
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SubjectOutcome::Failure { .. }))
            .count()
    }

    /// Convert to a process-level result: any failed subject is an error.
    pub fn into_result(self) -> Result<()> {
        let failed = self.failed();
        if failed > 0 {
            Err(NormError::SubjectFailures {
                failed,
                total: self.total(),
            })
        } else {
            Ok(())
        }
    }
}

/// Create an output directory if needed.
///
/// An existing directory is reused with a warning; creation failures other
/// than "already exists" are fatal.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        warn!(
            "output directory {} already exists, may overwrite existing files",
            dir.display()
        );
    } else {
        info!("creating output directory: {}", dir.display());
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn derive_wm_mask(subject: &Subject, wm_dir: &Path) -> Result<PathBuf> {
    let mask_path = subject
        .mask
        .as_ref()
        .ok_or_else(|| NormError::input("brain masks are required to derive WM masks"))?;
    let image = read_volume(&subject.image)?;
    let brain_mask = read_volume(mask_path)?;
    let wm_mask = fcm::find_wm_mask(&image, &brain_mask, fcm::DEFAULT_CLASSES)?;

    let (_, base, _) = split_filename(&subject.image);
    let out = wm_dir.join(format!("{}_wmmask.nii.gz", base));
    write_volume(&out, &wm_mask)?;
    Ok(out)
}

fn normalize_subject(
    subject: &Subject,
    wm_path: &Path,
    out_dir: &Path,
    norm_value: f64,
) -> Result<PathBuf> {
    let image = read_volume(&subject.image)?;
    let wm_mask = read_volume(wm_path)?;
    let normalized = fcm::fcm_normalize(&image, &wm_mask, norm_value)?;

    let (_, base, _) = split_filename(&subject.image);
    let out = out_dir.join(format!("{}_fcm.nii.gz", base));
    write_volume(&out, &normalized)?;
    Ok(out)
}

/// Normalize a directory of images with the two-phase fcm workflow.
///
/// Phase A derives one WM mask per subject into a `wm_masks` directory next
/// to the output directory (skipped when `wm_mask_dir` already supplies
/// them); Phase B normalizes every subject against its mask. Phase B never
/// starts until Phase A has a WM mask for every subject. Returns the
/// normalized output paths in correspondence order.
pub fn fcm_normalize_directory(
    image_dir: &Path,
    brain_mask_dir: Option<&Path>,
    wm_mask_dir: Option<&Path>,
    output_dir: Option<&Path>,
    contrast: &str,
    norm_value: f64,
) -> Result<Vec<PathBuf>> {
    let image_fns = glob_nii(image_dir)?;
    let mask_fns = match brain_mask_dir {
        Some(dir) => Some(glob_nii(dir)?),
        None => None,
    };
    let cohort = Cohort::pair(image_fns, mask_fns, None)?;

    let out_dir = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("fcm"));
    ensure_dir(&out_dir)?;

    let mut stages = vec![SubjectStage::Pending; cohort.len()];

    // Phase A: derive or locate one WM mask per subject.
    let wm_paths: Vec<PathBuf> = match wm_mask_dir {
        None => {
            if !contrast.eq_ignore_ascii_case("t1") {
                return Err(NormError::input(format!(
                    "contrast '{}' requires an existing WM mask directory",
                    contrast
                )));
            }
            let base_dir = match out_dir.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let wm_dir = base_dir.join("wm_masks");
            ensure_dir(&wm_dir)?;

            let mut paths = Vec::with_capacity(cohort.len());
            for subject in &cohort {
                info!(
                    "deriving WM mask for {} ({}/{})",
                    subject.image.display(),
                    subject.index + 1,
                    cohort.len()
                );
                match derive_wm_mask(subject, &wm_dir) {
                    Ok(path) => {
                        stages[subject.index] = SubjectStage::MaskDerived;
                        paths.push(path);
                    }
                    Err(e) => {
                        stages[subject.index] = SubjectStage::Failed;
                        return Err(e);
                    }
                }
            }
            paths
        }
        Some(dir) => {
            let wm_fns = glob_nii(dir)?;
            if wm_fns.len() != cohort.len() {
                return Err(NormError::Correspondence {
                    expected: cohort.len(),
                    actual: wm_fns.len(),
                });
            }
            // Supplied masks are reused, not recomputed.
            for stage in stages.iter_mut() {
                *stage = SubjectStage::MaskDerived;
            }
            wm_fns
        }
    };

    // Phase barrier: every subject must hold a WM mask before Phase B.
    assert!(
        stages.iter().all(|s| *s == SubjectStage::MaskDerived),
        "phase A left subjects without WM masks"
    );

    // Phase B: normalize every subject.
    let mut outputs = Vec::with_capacity(cohort.len());
    for (subject, wm_path) in cohort.iter().zip(wm_paths.iter()) {
        let (_, base, _) = split_filename(&subject.image);
        info!(
            "normalizing image {} ({}/{})",
            base,
            subject.index + 1,
            cohort.len()
        );
        match normalize_subject(subject, wm_path, &out_dir, norm_value) {
            Ok(path) => {
                stages[subject.index] = SubjectStage::Normalized;
                outputs.push(path);
            }
            Err(e) => {
                stages[subject.index] = SubjectStage::Failed;
                return Err(e);
            }
        }
    }
    Ok(outputs)
}

/// Normalize a single image, bypassing directory globbing.
///
/// With a brain mask and t1 contrast the WM mask is derived first and
/// persisted next to the output; with a WM mask the image is normalized
/// directly.
pub fn fcm_normalize_single(
    image_path: &Path,
    brain_mask: Option<&Path>,
    wm_mask: Option<&Path>,
    output_dir: Option<&Path>,
    contrast: &str,
    norm_value: f64,
) -> Result<PathBuf> {
    let (image_dir, base, _) = split_filename(image_path);
    let out_dir = output_dir.map(Path::to_path_buf).unwrap_or(image_dir);
    ensure_dir(&out_dir)?;

    let image = read_volume(image_path)?;
    let wm_volume = match wm_mask {
        Some(path) => read_volume(path)?,
        None => {
            if !contrast.eq_ignore_ascii_case("t1") {
                return Err(NormError::input(format!(
                    "contrast '{}' requires a WM mask",
                    contrast
                )));
            }
            let mask_path = brain_mask.ok_or_else(|| {
                NormError::input("a brain mask is required to derive the WM mask")
            })?;
            info!("deriving WM mask for {}", image_path.display());
            let brain = read_volume(mask_path)?;
            let wm = fcm::find_wm_mask(&image, &brain, fcm::DEFAULT_CLASSES)?;
            let wm_path = out_dir.join(format!("{}_wmmask.nii.gz", base));
            write_volume(&wm_path, &wm)?;
            wm
        }
    };

    info!("normalizing image {}", base);
    let normalized = fcm::fcm_normalize(&image, &wm_volume, norm_value)?;
    let out = out_dir.join(format!("{}_fcm.nii.gz", base));
    write_volume(&out, &normalized)?;
    info!("normalized image saved: {}", out.display());
    Ok(out)
}

fn preprocess_subject(
    subject: &Subject,
    out_img_dir: &Path,
    out_mask_dir: &Path,
    opts: &PreprocessOpts,
) -> Result<PathBuf> {
    let mask_path = subject
        .mask
        .as_ref()
        .expect("preprocess cohort is built with masks");
    let image = read_volume(&subject.image)?;
    let mask = read_volume(mask_path)?;

    let (processed_image, processed_mask) = preprocess(&image, &mask, opts)?;

    let (_, img_base, img_ext) = split_filename(&subject.image);
    let (_, mask_base, mask_ext) = split_filename(mask_path);
    let out_img = out_img_dir.join(format!("{}{}", img_base, img_ext));
    let out_mask = out_mask_dir.join(format!("{}{}", mask_base, mask_ext));
    write_volume(&out_img, &processed_image)?;
    write_volume(&out_mask, &processed_mask)?;
    Ok(out_img)
}

/// Preprocess a directory of image/mask pairs.
///
/// Outputs land under `imgs/` and `masks/` subdirectories of `out_dir`.
/// Failures are isolated per subject: siblings keep running and the
/// returned summary records every outcome.
pub fn preprocess_directory(
    img_dir: &Path,
    mask_dir: &Path,
    out_dir: &Path,
    opts: &PreprocessOpts,
) -> Result<BatchSummary> {
    let image_fns = glob_nii(img_dir)?;
    let mask_fns = glob_nii(mask_dir)?;
    let cohort = Cohort::pair(image_fns, Some(mask_fns), None)?;

    ensure_dir(out_dir)?;
    let out_img_dir = out_dir.join("imgs");
    let out_mask_dir = out_dir.join("masks");
    ensure_dir(&out_img_dir)?;
    ensure_dir(&out_mask_dir)?;

    let mut summary = BatchSummary::default();
    for subject in &cohort {
        let (_, base, _) = split_filename(&subject.image);
        info!(
            "preprocessing image: {} ({}/{})",
            base,
            subject.index + 1,
            cohort.len()
        );
        match preprocess_subject(subject, &out_img_dir, &out_mask_dir, opts) {
            Ok(output) => summary.outcomes.push(SubjectOutcome::Success {
                subject: subject.index,
                output,
            }),
            Err(e) => {
                error!("preprocessing failed for {}: {}", base, e);
                summary.outcomes.push(SubjectOutcome::Failure {
                    subject: subject.index,
                    error: e,
                });
            }
        }
    }

    let failed = summary.failed();
    if failed > 0 {
        warn!("{} of {} subjects failed", failed, summary.total());
    }
    Ok(summary)
}

/// Where registration templates come from.
#[derive(Debug, Clone)]
pub enum TemplateSpec {
    /// One template for the whole batch, reoriented once and reused.
    Single(PathBuf),
    /// One template per subject, paired positionally.
    PerSubject(PathBuf),
}

fn register_subject(
    image_path: &Path,
    template: &Volume,
    out_dir: &Path,
    opts: &RegisterOpts,
    orientation_code: &str,
    index: usize,
    total: usize,
) -> Result<PathBuf> {
    let (_, base, _) = split_filename(image_path);
    info!(
        "registering image to template: {} ({}/{})",
        base,
        index + 1,
        total
    );
    let moving = orientation::reorient(&read_volume(image_path)?, orientation_code)?;
    let registered = register::register(&moving, template, opts)?;

    let out = out_dir.join(format!("{}_reg.nii.gz", base));
    write_volume(&out, &registered)?;
    Ok(out)
}

/// Register a directory of images to a template.
///
/// With [`TemplateSpec::PerSubject`] each image adopts its own template's
/// orientation; with [`TemplateSpec::Single`] the template is read and
/// reoriented to `orientation_code` exactly once and shared read-only for
/// the whole batch. Registration failures abort the batch.
pub fn coregister_directory(
    img_dir: &Path,
    template: &TemplateSpec,
    out_dir: &Path,
    opts: &RegisterOpts,
    orientation_code: &str,
) -> Result<Vec<PathBuf>> {
    let image_fns = glob_nii(img_dir)?;
    ensure_dir(out_dir)?;

    let mut outputs = Vec::new();
    match template {
        TemplateSpec::PerSubject(template_dir) => {
            let template_fns = glob_nii(template_dir)?;
            let cohort = Cohort::pair(image_fns, None, Some(template_fns))?;
            for subject in &cohort {
                let template_path = subject
                    .aux
                    .as_ref()
                    .expect("coregister cohort is built with templates");
                let template = read_volume(template_path)?;
                // Each moving image adopts its own template's orientation.
                let code = template.orientation();
                outputs.push(register_subject(
                    &subject.image,
                    &template,
                    out_dir,
                    opts,
                    &code,
                    subject.index,
                    cohort.len(),
                )?);
            }
        }
        TemplateSpec::Single(template_path) => {
            let cohort = Cohort::pair(image_fns, None, None)?;
            // Canonical template: built once before the loop, shared
            // read-only across all subjects.
            info!("reading template {}", template_path.display());
            let template =
                orientation::reorient(&read_volume(template_path)?, orientation_code)?;
            for subject in &cohort {
                outputs.push(register_subject(
                    &subject.image,
                    &template,
                    out_dir,
                    opts,
                    orientation_code,
                    subject.index,
                    cohort.len(),
                )?);
            }
        }
    }
    Ok(outputs)
}
