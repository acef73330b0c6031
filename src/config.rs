//! Pipeline configuration.
//!
//! Every externally resolved resource (tool executables, reference
//! atlases, the output root, the tool time budget) lives in one struct
//! that is loaded from a TOML file and injected at construction. Nothing
//! in the pipeline reads ambient process-wide state.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::PipelineError;

/// Configuration injected into
/// [`Generalisation::new`](crate::generalisation::Generalisation::new).
///
/// Only the reference data (both atlases and the toolkit launcher) has no
/// default; everything else falls back to the values below.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Output root for all produced artifacts.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// T1 reference atlas volume, used for every modality except t2.
    pub atlas_t1: PathBuf,
    /// T2 reference atlas volume.
    pub atlas_t2: PathBuf,
    /// Registration toolkit launcher executable.
    pub toolkit: PathBuf,
    /// DICOM converter executable.
    #[serde(default = "default_converter")]
    pub converter: PathBuf,
    /// N4 bias correction executable.
    #[serde(default = "default_bias_corrector")]
    pub bias_corrector: PathBuf,
    /// Single-volume skull stripping executable.
    #[serde(default = "default_strip_single")]
    pub strip_single: PathBuf,
    /// Four-modality skull stripping executable.
    #[serde(default = "default_strip_multi")]
    pub strip_multi: PathBuf,
    /// Compute device handed to the skull stripper.
    #[serde(default = "default_device")]
    pub device: String,
    /// Time budget per external tool invocation, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Target voxel grid for resampling, in x/y/z order.
    #[serde(default = "default_target_shape")]
    pub target_shape: [usize; 3],
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("generalisation")
}

fn default_converter() -> PathBuf {
    PathBuf::from("dcm2niix")
}

fn default_bias_corrector() -> PathBuf {
    PathBuf::from("N4BiasFieldCorrection")
}

fn default_strip_single() -> PathBuf {
    PathBuf::from("brain_mage_single_run")
}

fn default_strip_multi() -> PathBuf {
    PathBuf::from("brain_mage_single_run_multi_4")
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_target_shape() -> [usize; 3] {
    [240, 240, 155]
}

impl PipelineConfig {
    /// Load the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be read and
    /// [`PipelineError::ConfigParse`] if it is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Time budget per tool invocation.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check that the reference data required by the registration and
    /// skull-stripping stages is on disk.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (what, path) in [
            ("T1 atlas", &self.atlas_t1),
            ("T2 atlas", &self.atlas_t2),
            ("toolkit launcher", &self.toolkit),
        ] {
            if !path.exists() {
                return Err(PipelineError::Configuration(format!(
                    "{what} not found at {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}
