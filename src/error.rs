use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::enums::Modality;

/// Everything that can go wrong while coordinating the pipeline.
///
/// External tools fail in three distinct ways: a non-zero exit, an
/// exhausted time budget, or a zero exit without the expected output
/// file on disk. All three carry the tool name so the failing stage is
/// identifiable from the message alone.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Path has no filename and parent components: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("Unknown modality: {0}")]
    UnknownModality(String),

    #[error("No measure registered for modality {0}")]
    MissingModality(Modality),

    #[error("Stage order violated: {0}")]
    StageOrder(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("{tool} failed ({status}): {output}")]
    ToolFailed {
        tool: String,
        status: ExitStatus,
        output: String,
    },

    #[error("{tool} timed out after {}s", .limit.as_secs())]
    ToolTimeout { tool: String, limit: Duration },

    #[error("Expected {tool} output missing: {}", .path.display())]
    MissingOutput { tool: String, path: PathBuf },

    #[error("Not a resampleable volume: {0}")]
    InvalidVolume(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),
}
