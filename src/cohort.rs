//! Cohort construction and correspondence validation
//!
//! A cohort pairs every image in a batch with its per-subject artifacts
//! (brain mask, template, derived WM mask) by position. Directory listings
//! are sorted by filename, so the pairing is deterministic, and the pairing
//! is materialized once into an indexed table rather than re-derived by
//! zipping listings at each use site. Only counts are checked: two
//! collections of equal length with mismatched contents cannot be detected
//! here (documented risk; geometry disagreements surface per subject as
//! grid-mismatch failures when a mask is applied).

use std::path::{Path, PathBuf};

use crate::errors::{NormError, Result};

/// List the NIfTI files (`.nii`, `.nii.gz`) in a directory, sorted by
/// filename.
///
/// The sorted order is the correspondence order for the whole batch; it is
/// established here once and never re-derived.
pub fn glob_nii(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file() && {
                let name = p.file_name().map(|n| n.to_string_lossy().to_string());
                name.map(|n| n.ends_with(".nii") || n.ends_with(".nii.gz"))
                    .unwrap_or(false)
            }
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Split a NIfTI path into (directory, base name, extension).
///
/// Treats `.nii.gz` as a single extension so `sub-1_T1w.nii.gz` splits into
/// base `sub-1_T1w` and extension `.nii.gz`.
pub fn split_filename(path: &Path) -> (PathBuf, String, String) {
    let dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if let Some(base) = name.strip_suffix(".nii.gz") {
        return (dir, base.to_string(), ".nii.gz".to_string());
    }
    if let Some(base) = name.strip_suffix(".nii") {
        return (dir, base.to_string(), ".nii".to_string());
    }
    match name.rfind('.') {
        Some(pos) if pos > 0 => (dir, name[..pos].to_string(), name[pos..].to_string()),
        _ => (dir, name, String::new()),
    }
}

/// One cohort entry: an image and its positionally paired artifacts.
#[derive(Debug, Clone)]
pub struct Subject {
    /// Position in the validated correspondence order.
    pub index: usize,
    /// Path to the subject's image.
    pub image: PathBuf,
    /// Optional paired brain mask.
    pub mask: Option<PathBuf>,
    /// Optional paired auxiliary artifact (WM mask or template).
    pub aux: Option<PathBuf>,
}

/// An indexed association of images with per-subject artifacts.
///
/// Built once by [`Cohort::pair`] after the count check; downstream stages
/// iterate subjects instead of zipping raw listings.
#[derive(Debug, Clone)]
pub struct Cohort {
    subjects: Vec<Subject>,
}

impl Cohort {
    /// Pair images with optional mask and auxiliary collections.
    ///
    /// Succeeds iff every supplied collection has the same length as the
    /// image collection and that length is greater than zero; fails with
    /// [`NormError::Correspondence`] otherwise. No file contents are
    /// inspected.
    pub fn pair(
        images: Vec<PathBuf>,
        masks: Option<Vec<PathBuf>>,
        aux: Option<Vec<PathBuf>>,
    ) -> Result<Cohort> {
        let expected = images.len();
        if expected == 0 {
            return Err(NormError::Correspondence {
                expected,
                actual: 0,
            });
        }
        for overlay in [&masks, &aux].into_iter().flatten() {
            if overlay.len() != expected {
                return Err(NormError::Correspondence {
                    expected,
                    actual: overlay.len(),
                });
            }
        }

        let subjects = images
            .into_iter()
            .enumerate()
            .map(|(index, image)| Subject {
                index,
                image,
                mask: masks.as_ref().map(|m| m[index].clone()),
                aux: aux.as_ref().map(|a| a[index].clone()),
            })
            .collect();
        Ok(Cohort { subjects })
    }

    /// Number of subjects.
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether the cohort has no subjects (never true for a paired cohort).
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Iterate subjects in correspondence order.
    pub fn iter(&self) -> std::slice::Iter<'_, Subject> {
        self.subjects.iter()
    }
}

impl<'a> IntoIterator for &'a Cohort {
    type Item = &'a Subject;
    type IntoIter = std::slice::Iter<'a, Subject>;

    fn into_iter(self) -> Self::IntoIter {
        self.subjects.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_split_filename_gz() {
        let (dir, base, ext) = split_filename(Path::new("/data/sub-1_T1w.nii.gz"));
        assert_eq!(dir, PathBuf::from("/data"));
        assert_eq!(base, "sub-1_T1w");
        assert_eq!(ext, ".nii.gz");
    }

    #[test]
    fn test_split_filename_nii() {
        let (_, base, ext) = split_filename(Path::new("brain.nii"));
        assert_eq!(base, "brain");
        assert_eq!(ext, ".nii");
    }

    #[test]
    fn test_split_filename_other() {
        let (_, base, ext) = split_filename(Path::new("notes.txt"));
        assert_eq!(base, "notes");
        assert_eq!(ext, ".txt");
    }

    #[test]
    fn test_pair_matching_counts() {
        let cohort = Cohort::pair(
            paths(&["a.nii", "b.nii", "c.nii"]),
            Some(paths(&["am.nii", "bm.nii", "cm.nii"])),
            None,
        )
        .unwrap();
        assert_eq!(cohort.len(), 3);
        let second = cohort.iter().nth(1).unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.image, PathBuf::from("b.nii"));
        assert_eq!(second.mask.as_deref(), Some(Path::new("bm.nii")));
        assert!(second.aux.is_none());
    }

    #[test]
    fn test_pair_count_mismatch() {
        let err = Cohort::pair(
            paths(&["a.nii", "b.nii", "c.nii"]),
            Some(paths(&["am.nii", "bm.nii"])),
            None,
        )
        .unwrap_err();
        match err {
            NormError::Correspondence { expected, actual } => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected Correspondence, got {:?}", other),
        }
    }

    #[test]
    fn test_pair_empty_primary() {
        let err = Cohort::pair(vec![], None, None).unwrap_err();
        assert!(matches!(err, NormError::Correspondence { expected: 0, .. }));
    }

    #[test]
    fn test_pair_aux_mismatch() {
        let err = Cohort::pair(
            paths(&["a.nii", "b.nii"]),
            Some(paths(&["am.nii", "bm.nii"])),
            Some(paths(&["t.nii"])),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NormError::Correspondence {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_glob_nii_sorted_and_filtered() {
        let dir = std::env::temp_dir().join("norm_core_glob_test");
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.nii", "a.nii.gz", "c.txt", "d.nii"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let listed = glob_nii(&dir).unwrap();
        let names: Vec<String> = listed
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.nii.gz", "b.nii", "d.nii"]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
