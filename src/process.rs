//! Bounded subprocess execution shared by the tool adapters.
//!
//! Every external invocation goes through [`run_tool`]: output is captured,
//! the wait is capped by the configured time budget, and an over-budget
//! child is killed rather than left to block the pipeline.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::time;

use crate::error::PipelineError;

/// Run an external tool to completion and capture its output.
///
/// The child is spawned with `kill_on_drop`, so hitting the time budget
/// drops the wait future and terminates the process before the timeout
/// error is returned. A non-zero exit yields [`PipelineError::ToolFailed`]
/// carrying the captured stderr (stdout when stderr is empty).
pub(crate) async fn run_tool(
    tool: &str,
    mut command: Command,
    limit: Duration,
) -> Result<Output, PipelineError> {
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    tracing::debug!(tool, command = ?command.as_std(), "invoking external tool");

    let child = command.spawn()?;
    let output = match time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(PipelineError::ToolTimeout {
                tool: tool.to_string(),
                limit,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let captured = if stderr.is_empty() { stdout } else { stderr };
        return Err(PipelineError::ToolFailed {
            tool: tool.to_string(),
            status: output.status,
            output: captured.trim().to_string(),
        });
    }

    Ok(output)
}

/// Uniform success criterion: a tool run only counts as successful once
/// every expected output file is actually present.
pub(crate) fn ensure_outputs<'a>(
    tool: &str,
    expected: impl IntoIterator<Item = &'a Path>,
) -> Result<(), PipelineError> {
    for path in expected {
        if !path.exists() {
            return Err(PipelineError::MissingOutput {
                tool: tool.to_string(),
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Label used in errors and logs for a configured executable.
pub(crate) fn tool_label(executable: &Path) -> String {
    executable
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.display().to_string())
}

/// Write an executable stand-in for an external tool, for exercising the
/// adapters without the real binaries installed.
#[cfg(all(test, unix))]
pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}
