//! # brain-prep
//!
//! Orchestrates the preprocessing of one patient study of brain MRI
//! series into atlas-aligned, skull-stripped NIfTI volumes.
//!
//! The imaging itself stays in the established neuroimaging tools; this
//! crate sequences them per study and tracks the artifact each series has
//! reached:
//!
//!  - DICOM to NIfTI conversion (dcm2niix)
//!  - N4 bias field correction
//!  - co-registration into SRI24 atlas space (CaPTk)
//!  - skull stripping (BrainMaGe)
//!  - optional resampling onto a standard voxel grid, done in process
//!
//! A study with all four anatomical modalities (t1, t1ce, t2, flair) goes
//! through the combined four-input registration and stripping pipelines;
//! anything less falls back to per-series runs against the reference
//! atlases. External tools run as subprocesses with a bounded wait, and a
//! stage only records its artifact once the tool exited cleanly and the
//! expected file is on disk, so a failed stage never advances a series.
//!
//! # Examples
//!
//! ## Preprocessing a two-series study
//!
//! Ingest the t1 and flair series of a study, run every stage, and print
//! where each series ended up:
//!
//! ```no_run
//! # use brain_prep::config::PipelineConfig;
//! # use brain_prep::enums::Modality;
//! # use brain_prep::generalisation::Generalisation;
//! # use brain_prep::measure::Measure;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), brain_prep::error::PipelineError> {
//! let config = PipelineConfig::from_file("brain-prep.toml".as_ref())?;
//! config.validate()?;
//!
//! let mut generalisation = Generalisation::new(&config);
//! generalisation.insert(Measure::from_dicom_dir(Modality::T1, "study/t1")?);
//! generalisation.insert(Measure::from_dicom_dir(Modality::Flair, "study/flair")?);
//! generalisation.run_all(true).await?;
//!
//! for measure in generalisation.measures() {
//!     println!("{} -> {}", measure.modality, measure.current.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod bias;
pub mod config;
pub mod convert;
pub mod enums;
pub mod error;
pub mod generalisation;
mod interpolator;
pub mod measure;
pub mod paths;
mod process;
pub mod resample;
pub mod toolkit;
