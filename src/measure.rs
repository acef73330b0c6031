//! Per-series bookkeeping for one patient study.

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::Tag;
use dicom::object::{FileDicomObject, InMemDicomObject, open_file};
use dicom_dictionary_std::tags;

use crate::enums::Modality;
use crate::error::PipelineError;

/// One acquired series, tracked through the preprocessing stages.
///
/// `current` always points at the artifact of the last completed stage,
/// starting at the raw source. Stage fields keep the intermediate paths
/// so earlier artifacts stay addressable after later stages overwrite
/// `current`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measure {
    pub modality: Modality,
    /// DICOM series directory (or an already-converted volume).
    pub source: PathBuf,
    /// Artifact of the last completed stage.
    pub current: PathBuf,
    pub converted: Option<PathBuf>,
    pub bias_corrected: Option<PathBuf>,
    pub coregistered: Option<PathBuf>,
    /// Skull-stripped volume. Stays `None` after a combined four-modality
    /// run, which emits only the shared mask.
    pub skull_stripped: Option<PathBuf>,
    /// Binary brain mask, per-series or shared depending on the
    /// stripping mode.
    pub brain_mask: Option<PathBuf>,
    pub resampled: Option<PathBuf>,
    /// Patient identifier from the series metadata, when readable.
    pub subject_id: Option<String>,
    /// Directory of the study this series belongs to.
    pub study_dir: Option<PathBuf>,
    /// Acquisition date, falling back to the study date.
    pub acquired: Option<String>,
}

impl Measure {
    pub fn new(modality: Modality, source: PathBuf) -> Self {
        Self {
            modality,
            current: source.clone(),
            source,
            converted: None,
            bias_corrected: None,
            coregistered: None,
            skull_stripped: None,
            brain_mask: None,
            resampled: None,
            subject_id: None,
            study_dir: None,
            acquired: None,
        }
    }

    /// Build a measure from a DICOM series directory, reading the patient
    /// identity from the first readable `.dcm` file. Identity fields stay
    /// `None` when nothing in the directory parses; the conversion stage
    /// scans the directory itself either way. The study directory is the
    /// series directory's parent.
    pub fn from_dicom_dir(
        modality: Modality,
        dir: impl AsRef<Path>,
    ) -> Result<Self, PipelineError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(PipelineError::InvalidPath(dir.to_path_buf()));
        }

        let mut measure = Self::new(modality, dir.to_path_buf());
        measure.study_dir = dir
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf);
        if let Some(object) = Self::first_readable_object(dir) {
            measure.subject_id = string_element(&object, tags::PATIENT_ID);
            measure.acquired = string_element(&object, tags::ACQUISITION_DATE)
                .or_else(|| string_element(&object, tags::STUDY_DATE));
        }
        Ok(measure)
    }

    fn first_readable_object(dir: &Path) -> Option<FileDicomObject<InMemDicomObject>> {
        let mut paths: Vec<_> = fs::read_dir(dir)
            .ok()?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();
        paths.sort();
        paths.into_iter().find_map(|path| open_file(&path).ok())
    }

    pub fn record_converted(&mut self, path: PathBuf) {
        self.current = path.clone();
        self.converted = Some(path);
    }

    pub fn record_bias_corrected(&mut self, path: PathBuf) {
        self.current = path.clone();
        self.bias_corrected = Some(path);
    }

    pub fn record_coregistered(&mut self, path: PathBuf) {
        self.current = path.clone();
        self.coregistered = Some(path);
    }

    /// Record a skull-strip outcome. `current` converges on the brain
    /// mask, the one artifact both stripping modes produce.
    pub fn record_skull_stripped(&mut self, volume: Option<PathBuf>, mask: PathBuf) {
        self.skull_stripped = volume;
        self.current = mask.clone();
        self.brain_mask = Some(mask);
    }

    pub fn record_resampled(&mut self, path: PathBuf) {
        self.current = path.clone();
        self.resampled = Some(path);
    }
}

fn string_element(object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
    let value = object.element(tag).ok()?.to_str().ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
