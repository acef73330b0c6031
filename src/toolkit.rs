//! Atlas registration and skull stripping through the external toolkit.
//!
//! Registration goes through a single launcher executable whose first
//! argument selects the application: the four-modality batch pipeline or
//! the single-volume preprocessing app. Skull stripping uses two
//! standalone model runners, one per mode.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::enums::{Modality, RegistrationKind};
use crate::error::PipelineError;
use crate::process;

/// Adapter for the registration toolkit launcher.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Toolkit launcher executable.
    pub launcher: PathBuf,
    /// Application name for the four-modality batch pipeline.
    pub batch_app: String,
    /// Application name for single-volume registration.
    pub single_app: String,
    /// T1 reference atlas, used for every modality except t2.
    pub atlas_t1: PathBuf,
    /// T2 reference atlas.
    pub atlas_t2: PathBuf,
    /// Transform requested in single mode.
    pub kind: RegistrationKind,
    /// `-s`: run the batch pipeline's tumor segmentation step. Off by
    /// default, this stage only wants the co-registered volumes.
    pub batch_segmentation: bool,
    /// `-b`: run the batch pipeline's own brain extraction step. Off by
    /// default; stripping is a separate stage here.
    pub batch_brain_extraction: bool,
    /// Time budget for one registration run.
    pub timeout: Duration,
}

impl Registration {
    pub fn new(
        launcher: PathBuf,
        atlas_t1: PathBuf,
        atlas_t2: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            batch_app: "BraTSPipeline.cwl".to_string(),
            single_app: "Preprocessing.cwl".to_string(),
            atlas_t1,
            atlas_t2,
            kind: RegistrationKind::default(),
            batch_segmentation: false,
            batch_brain_extraction: false,
            timeout,
        }
    }

    /// Atlas image a modality registers against.
    pub fn atlas_for(&self, modality: Modality) -> &Path {
        if modality == Modality::T2 {
            &self.atlas_t2
        } else {
            &self.atlas_t1
        }
    }

    /// The launcher and both atlases must be on disk before any
    /// registration runs.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (what, path) in [
            ("toolkit launcher", &self.launcher),
            ("T1 atlas", &self.atlas_t1),
            ("T2 atlas", &self.atlas_t2),
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

    /// One multi-input call co-registering all four anatomical modalities.
    ///
    /// `inputs` pairs each modality with its current volume, in the order
    /// the flags should appear; outputs land in `output_dir` as
    /// `<modality>_to_sri.nii.gz` and are returned in input order.
    pub async fn run_batch(
        &self,
        inputs: &[(Modality, PathBuf)],
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        self.validate()?;
        let mut command = Command::new(&self.launcher);
        command.arg(&self.batch_app);

        let mut outputs = Vec::with_capacity(inputs.len());
        for (modality, input) in inputs {
            let flag = modality.registration_flag().ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "{modality} has no batch registration input"
                ))
            })?;
            command.arg(flag).arg(input);
            outputs.push(output_dir.join(format!("{modality}_to_sri.nii.gz")));
        }
        command
            .arg("-o")
            .arg(output_dir)
            .args(["-s", bool_flag(self.batch_segmentation)])
            .args(["-b", bool_flag(self.batch_brain_extraction)]);

        process::run_tool(&self.batch_app, command, self.timeout).await?;
        process::ensure_outputs(&self.batch_app, outputs.iter().map(PathBuf::as_path))?;
        Ok(outputs)
    }

    /// Register one volume against the modality's reference atlas.
    pub async fn run_single(
        &self,
        input: &Path,
        modality: Modality,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        self.validate()?;
        let mut command = Command::new(&self.launcher);
        command
            .arg(&self.single_app)
            .arg("-i")
            .arg(input)
            .arg("-rFI")
            .arg(self.atlas_for(modality))
            .arg("-o")
            .arg(output)
            .args(["-reg", self.kind.as_arg()]);

        process::run_tool(&self.single_app, command, self.timeout).await?;
        process::ensure_outputs(&self.single_app, [output])?;
        Ok(output.to_path_buf())
    }
}

fn bool_flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

/// Adapter for the skull-stripping model runners.
#[derive(Debug, Clone)]
pub struct BrainMage {
    /// Single-volume runner executable.
    pub single_executable: PathBuf,
    /// Four-modality runner executable.
    pub multi_executable: PathBuf,
    /// Compute device handed to the model (`cpu` or a GPU ordinal).
    pub device: String,
    /// Time budget for one stripping run.
    pub timeout: Duration,
}

impl BrainMage {
    pub fn new(
        single_executable: PathBuf,
        multi_executable: PathBuf,
        device: String,
        timeout: Duration,
    ) -> Self {
        Self {
            single_executable,
            multi_executable,
            device,
            timeout,
        }
    }

    /// Strip one volume, producing the brain volume and its binary mask.
    pub async fn run_single(
        &self,
        input: &Path,
        output: &Path,
        mask: &Path,
    ) -> Result<(), PipelineError> {
        let tool = process::tool_label(&self.single_executable);

        let mut command = Command::new(&self.single_executable);
        command
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-m")
            .arg(mask)
            .args(["-dev", &self.device]);

        process::run_tool(&tool, command, self.timeout).await?;
        process::ensure_outputs(&tool, [output, mask])?;
        Ok(())
    }

    /// One combined run over the four anatomical volumes, writing a single
    /// shared brain mask. Callers pass the inputs in the fixed order
    /// t1, t2, t1ce, flair.
    pub async fn run_multi(&self, inputs: &[PathBuf], mask: &Path) -> Result<(), PipelineError> {
        let tool = process::tool_label(&self.multi_executable);

        let mut command = Command::new(&self.multi_executable);
        for input in inputs {
            command.arg("-i").arg(input);
        }
        command.arg("-o").arg(mask).args(["-dev", &self.device]);

        process::run_tool(&tool, command, self.timeout).await?;
        process::ensure_outputs(&tool, [mask])?;
        Ok(())
    }
}
