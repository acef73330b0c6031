//! N4 bias-field correction through an external executable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::error::PipelineError;
use crate::process;

/// Adapter for an N4-style bias correction tool
/// (`N4BiasFieldCorrection -d 3 -i <in> -o <out>`).
#[derive(Debug, Clone)]
pub struct N4BiasCorrector {
    /// Correction executable.
    pub executable: PathBuf,
    /// `-d`: image dimensionality. Default 3.
    pub dimensionality: String,
    /// `-s`: shrink factor applied before estimating the field. Unset by
    /// default, leaving the tool's own default in effect.
    pub shrink_factor: Option<String>,
    /// Appended verbatim after the configured flags.
    pub extra: Vec<String>,
    /// Time budget for one correction.
    pub timeout: Duration,
}

impl N4BiasCorrector {
    pub fn new(executable: PathBuf, timeout: Duration) -> Self {
        Self {
            executable,
            dimensionality: "3".to_string(),
            shrink_factor: None,
            extra: Vec::new(),
            timeout,
        }
    }

    /// Correct one volume, writing the result to `output`.
    pub async fn run(&self, input: &Path, output: &Path) -> Result<PathBuf, PipelineError> {
        let tool = process::tool_label(&self.executable);

        let mut command = Command::new(&self.executable);
        command
            .args(["-d", &self.dimensionality])
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output);
        if let Some(shrink_factor) = &self.shrink_factor {
            command.args(["-s", shrink_factor]);
        }
        command.args(&self.extra);

        process::run_tool(&tool, command, self.timeout).await?;
        process::ensure_outputs(&tool, [output])?;
        Ok(output.to_path_buf())
    }
}
