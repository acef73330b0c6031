//! DICOM-to-NIfTI conversion through the external dcm2niix tool.
//!
//! The converter is invoked without `-o`, so it writes next to its input;
//! the adapter then relocates the template-named output file into the
//! requested directory. Flag values are pass-through and not validated
//! beyond type; see the converter's own help text for accepted domains.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::error::PipelineError;
use crate::process;

/// Flag surface of the wrapped converter, one field per CLI option.
#[derive(Debug, Clone)]
pub struct Dcm2niix {
    /// Converter executable.
    pub executable: PathBuf,
    /// gz compression level, 1 (fastest) to 9 (smallest); passed as
    /// `-<level>`. Default 6.
    pub compress: String,
    /// `-a`: adjacent DICOMs, images from the same series always in the
    /// same folder (y/n). Default n.
    pub adjacent: String,
    /// `-b`: BIDS sidecar (y/n/o). Default n.
    pub bids: String,
    /// `-ba`: anonymize BIDS (y/n). Default y.
    pub anonymize_bids: String,
    /// `-d`: directory search depth for DICOMs in sub-folders (0..9).
    /// Default 5.
    pub depth: String,
    /// `-e`: export as NRRD (y) or MGH (o) instead of NIfTI (y/n/o).
    /// Default n.
    pub export_format: String,
    /// `-f`: output filename template (`%f`=folder, `%p`=protocol,
    /// `%t`=time, `%s`=series number, ...). Default `%f_%p_%t_%s`.
    pub filename: String,
    /// `-g`: generate defaults file (y/n/o/i). Default n.
    pub generate_defaults: String,
    /// `-i`: ignore derived, localizer and 2D images (y/n). Default n.
    pub ignore_derived: String,
    /// `-l`: losslessly scale 16-bit integers (y/n/o). Default o.
    pub scale: String,
    /// `-m`: merge 2D slices from the same series (n/y/0/1/2). Default 2.
    pub merge: String,
    /// `-n`: only convert this series CRC number. Unset by default.
    pub series_number: Option<String>,
    /// `-s`: single file mode, do not convert other images in the folder
    /// (y/n). Default n.
    pub single_file: String,
    /// `-v`: verbosity (0/1/2). Default 0.
    pub verbose: String,
    /// `-w`: write behavior on name conflicts (0=skip, 1=overwrite,
    /// 2=add suffix). Default 2.
    pub conflict: String,
    /// `-x`: crop 3D acquisitions (y/n/i). Default n.
    pub crop: String,
    /// `-z`: gz compress images (y/o/i/n/3). Default y.
    pub gzip: String,
    /// Appended verbatim after the configured flags.
    pub extra: Vec<String>,
    /// Time budget for one conversion.
    pub timeout: Duration,
}

impl Dcm2niix {
    pub fn new(executable: PathBuf, timeout: Duration) -> Self {
        Self {
            executable,
            compress: "6".to_string(),
            adjacent: "n".to_string(),
            bids: "n".to_string(),
            anonymize_bids: "y".to_string(),
            depth: "5".to_string(),
            export_format: "n".to_string(),
            filename: "%f_%p_%t_%s".to_string(),
            generate_defaults: "n".to_string(),
            ignore_derived: "n".to_string(),
            scale: "o".to_string(),
            merge: "2".to_string(),
            series_number: None,
            single_file: "n".to_string(),
            verbose: "0".to_string(),
            conflict: "2".to_string(),
            crop: "n".to_string(),
            gzip: "y".to_string(),
            extra: Vec::new(),
            timeout,
        }
    }

    /// Convert one DICOM series directory into a packed NIfTI volume.
    ///
    /// On success the converter has left `<filename>.nii.gz` in the source
    /// directory; the file is moved into `output_dir` and its new location
    /// returned.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ToolFailed`] on a non-zero exit,
    /// [`PipelineError::MissingOutput`] when the template-named file is
    /// absent after a zero exit.
    pub async fn run(
        &self,
        source_dir: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let tool = process::tool_label(&self.executable);
        let produced = source_dir.join(format!("{}.nii.gz", self.filename));
        let target = output_dir.join(format!("{}.nii.gz", self.filename));

        let mut command = Command::new(&self.executable);
        command
            .arg(format!("-{}", self.compress))
            .args(["-a", &self.adjacent])
            .args(["-b", &self.bids])
            .args(["-ba", &self.anonymize_bids])
            .args(["-d", &self.depth])
            .args(["-e", &self.export_format])
            .args(["-f", &self.filename])
            .args(["-g", &self.generate_defaults])
            .args(["-i", &self.ignore_derived])
            .args(["-l", &self.scale])
            .args(["-m", &self.merge]);
        if let Some(series_number) = &self.series_number {
            command.args(["-n", series_number]);
        }
        command
            .args(["-s", &self.single_file])
            .args(["-v", &self.verbose])
            .args(["-w", &self.conflict])
            .args(["-x", &self.crop])
            .args(["-z", &self.gzip])
            .args(&self.extra)
            .arg(source_dir);

        process::run_tool(&tool, command, self.timeout).await?;
        process::ensure_outputs(&tool, [produced.as_path()])?;

        tokio::fs::create_dir_all(output_dir).await?;
        tokio::fs::rename(&produced, &target).await?;
        Ok(target)
    }
}

impl Default for Dcm2niix {
    fn default() -> Self {
        Self::new(PathBuf::from("dcm2niix"), Duration::from_secs(3600))
    }
}
