//! Path utilities shared by the pipeline stages.
//!
//! Volume files carry compound extensions (`.nii.gz`), so the stem helpers
//! here strip up to two trailing suffixes instead of one.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Split a path into its base filename and parent directory.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidPath`] if the path has no
/// filename/parent boundary or the filename is not valid UTF-8.
pub fn split_path(path: &Path) -> Result<(&str, &Path), PipelineError> {
    let filename = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| PipelineError::InvalidPath(path.to_path_buf()))?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| PipelineError::InvalidPath(path.to_path_buf()))?;
    Ok((filename, parent))
}

/// Filename with up to two trailing extension suffixes removed:
/// `scan.nii.gz` and `scan.nii` both yield `scan`.
pub fn strip_double_extension(path: &Path) -> Result<&str, PipelineError> {
    let name = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| PipelineError::InvalidPath(path.to_path_buf()))?;
    let once = Path::new(name)
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or(name);
    let twice = Path::new(once)
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or(once);
    Ok(twice)
}

/// Insert a stage marker between the stem and the (possibly compound)
/// extension, keeping the directory: `/w/t1.nii.gz` + `_bc` becomes
/// `/w/t1_bc.nii.gz`.
pub fn with_stem_suffix(path: &Path, marker: &str) -> Result<PathBuf, PipelineError> {
    let name = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| PipelineError::InvalidPath(path.to_path_buf()))?;
    let stem = strip_double_extension(path)?;
    let extensions = &name[stem.len()..];
    Ok(path.with_file_name(format!("{stem}{marker}{extensions}")))
}

/// Create the directory (and parents) if absent; idempotent.
pub fn ensure_dir(path: &Path) -> Result<&Path, PipelineError> {
    fs::create_dir_all(path)?;
    Ok(path)
}
