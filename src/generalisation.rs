//! Stage coordinator for one patient study.
//!
//! Drives the preprocessing stages over whichever modalities were
//! ingested: series conversion, bias field correction, atlas
//! registration, skull stripping and optional grid resampling. When all
//! four anatomical modalities are present the registration and stripping
//! stages switch to the combined four-input tools; otherwise each series
//! runs through the single-volume fallbacks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::bias::N4BiasCorrector;
use crate::config::PipelineConfig;
use crate::convert::Dcm2niix;
use crate::enums::Modality;
use crate::error::PipelineError;
use crate::measure::Measure;
use crate::paths;
use crate::resample;
use crate::toolkit::{BrainMage, Registration};

/// Input order the four-modality stripping runner expects.
const BATCH_STRIP_ORDER: [Modality; 4] = [
    Modality::T1,
    Modality::T2,
    Modality::T1ce,
    Modality::Flair,
];

/// Coordinates the preprocessing stages for one study.
///
/// Holds one [`Measure`] per ingested modality; absent modalities are
/// simply not in the map. Whether the combined four-modality tools apply
/// is recomputed from the map on every stage, so measures can be added
/// or removed between stages.
pub struct Generalisation {
    work_dir: PathBuf,
    target_shape: [usize; 3],
    measures: BTreeMap<Modality, Measure>,
    pub converter: Dcm2niix,
    pub bias: N4BiasCorrector,
    pub registration: Registration,
    pub stripper: BrainMage,
}

impl Generalisation {
    pub fn new(config: &PipelineConfig) -> Self {
        let timeout = config.timeout();
        Self {
            work_dir: config.work_dir.clone(),
            target_shape: config.target_shape,
            measures: BTreeMap::new(),
            converter: Dcm2niix::new(config.converter.clone(), timeout),
            bias: N4BiasCorrector::new(config.bias_corrector.clone(), timeout),
            registration: Registration::new(
                config.toolkit.clone(),
                config.atlas_t1.clone(),
                config.atlas_t2.clone(),
                timeout,
            ),
            stripper: BrainMage::new(
                config.strip_single.clone(),
                config.strip_multi.clone(),
                config.device.clone(),
                timeout,
            ),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn set_work_dir(&mut self, dir: PathBuf) {
        self.work_dir = dir;
    }

    /// Register a measure, replacing any earlier one for the same
    /// modality.
    pub fn insert(&mut self, measure: Measure) -> Option<Measure> {
        let modality = measure.modality;
        self.measures.insert(modality, measure)
    }

    pub fn remove(&mut self, modality: Modality) -> Option<Measure> {
        self.measures.remove(&modality)
    }

    pub fn measure(&self, modality: Modality) -> Option<&Measure> {
        self.measures.get(&modality)
    }

    pub fn measures(&self) -> impl Iterator<Item = &Measure> {
        self.measures.values()
    }

    /// Whether every anatomical modality (t1, t1ce, t2, flair) is
    /// currently ingested. Evaluated against the live map each call.
    pub fn is_full_modality(&self) -> bool {
        Modality::ANATOMICAL
            .iter()
            .all(|modality| self.measures.contains_key(modality))
    }

    /// Convert the modality's DICOM series to a compressed NIfTI volume
    /// named `<modality>.nii.gz` in the work directory.
    pub async fn convert_stage(&mut self, modality: Modality) -> Result<PathBuf, PipelineError> {
        let work_dir = paths::ensure_dir(&self.work_dir)?.to_path_buf();
        let source = self.get(modality)?.source.clone();

        self.converter.filename = modality.name().to_string();
        debug!(%modality, source = %source.display(), "converting series");
        let converted = self.converter.run(&source, &work_dir).await?;

        self.get_mut(modality)?.record_converted(converted.clone());
        Ok(converted)
    }

    /// Correct the bias field of the modality's current volume. The
    /// output keeps the converted volume's name with a `_bc` marker.
    pub async fn bias_correct_stage(&mut self, modality: Modality) -> Result<PathBuf, PipelineError> {
        paths::ensure_dir(&self.work_dir)?;
        let (input, converted) = {
            let measure = self.get(modality)?;
            let converted = measure.converted.clone().ok_or_else(|| {
                PipelineError::StageOrder(format!(
                    "bias correction for {modality} requires a converted volume"
                ))
            })?;
            (measure.current.clone(), converted)
        };
        let output = paths::with_stem_suffix(&converted, "_bc")?;

        debug!(%modality, input = %input.display(), "correcting bias field");
        let corrected = self.bias.run(&input, &output).await?;

        self.get_mut(modality)?.record_bias_corrected(corrected.clone());
        Ok(corrected)
    }

    /// Register every ingested measure into atlas space.
    ///
    /// With the full anatomical set this is one combined call producing
    /// `<modality>_to_sri.nii.gz` per input; otherwise each measure's
    /// bias-corrected volume registers on its own against the modality's
    /// atlas, producing `<stem>_to_SRI.nii.gz`.
    pub async fn coregister_stage(&mut self) -> Result<(), PipelineError> {
        let work_dir = paths::ensure_dir(&self.work_dir)?.to_path_buf();

        if self.is_full_modality() {
            let mut inputs = Vec::with_capacity(Modality::ANATOMICAL.len());
            for modality in Modality::ANATOMICAL {
                inputs.push((modality, self.get(modality)?.current.clone()));
            }
            info!("co-registering all four modalities in one pass");
            let outputs = self.registration.run_batch(&inputs, &work_dir).await?;
            for ((modality, _), output) in inputs.into_iter().zip(outputs) {
                self.get_mut(modality)?.record_coregistered(output);
            }
        } else {
            for modality in self.present() {
                let input = self.get(modality)?.bias_corrected.clone().ok_or_else(|| {
                    PipelineError::StageOrder(format!(
                        "registration for {modality} requires a bias-corrected volume"
                    ))
                })?;
                let stem = paths::strip_double_extension(&input)?.to_string();
                let output = work_dir.join(format!("{stem}_to_SRI.nii.gz"));

                info!(%modality, "registering to atlas space");
                let registered = self.registration.run_single(&input, modality, &output).await?;
                self.get_mut(modality)?.record_coregistered(registered);
            }
        }
        Ok(())
    }

    /// Strip the skull from every ingested measure.
    ///
    /// With the full anatomical set one combined run produces a single
    /// shared `brain_mask.nii.gz`; otherwise each measure's current
    /// volume is stripped on its own into `<stem>_sks.nii.gz` plus its
    /// `<stem>_brain.nii.gz` mask. Either way each measure ends on its
    /// brain mask.
    pub async fn skull_strip_stage(&mut self) -> Result<(), PipelineError> {
        let work_dir = paths::ensure_dir(&self.work_dir)?.to_path_buf();

        if self.is_full_modality() {
            let mut inputs = Vec::with_capacity(BATCH_STRIP_ORDER.len());
            for modality in BATCH_STRIP_ORDER {
                inputs.push(self.get(modality)?.current.clone());
            }
            let mask = work_dir.join("brain_mask.nii.gz");

            info!("skull stripping all four modalities in one pass");
            self.stripper.run_multi(&inputs, &mask).await?;
            for modality in Modality::ANATOMICAL {
                self.get_mut(modality)?.record_skull_stripped(None, mask.clone());
            }
        } else {
            for modality in self.present() {
                let input = self.get(modality)?.current.clone();
                let stem = paths::strip_double_extension(&input)?.to_string();
                let volume = work_dir.join(format!("{stem}_sks.nii.gz"));
                let mask = work_dir.join(format!("{stem}_brain.nii.gz"));

                info!(%modality, "skull stripping");
                self.stripper.run_single(&input, &volume, &mask).await?;
                self.get_mut(modality)?.record_skull_stripped(Some(volume), mask);
            }
        }
        Ok(())
    }

    /// Resample one volume onto the standard grid shape, writing
    /// `<stem>_res.nii.gz` into the work directory.
    pub fn resample_to_standard(&self, input: &Path) -> Result<PathBuf, PipelineError> {
        let work_dir = paths::ensure_dir(&self.work_dir)?;
        let stem = paths::strip_double_extension(input)?;
        let output = work_dir.join(format!("{stem}_res.nii.gz"));
        resample::resample_to_shape(input, &output, self.target_shape)
    }

    /// Resample every measure's current artifact onto the standard grid.
    /// Artifacts shared between measures (the combined brain mask) are
    /// resampled once. Returns the distinct files produced.
    pub fn resample_stage(&mut self) -> Result<Vec<PathBuf>, PipelineError> {
        let mut done: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        for modality in self.present() {
            let input = self.get(modality)?.current.clone();
            let resampled = match done.get(&input) {
                Some(existing) => existing.clone(),
                None => {
                    info!(input = %input.display(), "resampling to standard shape");
                    let output = self.resample_to_standard(&input)?;
                    done.insert(input, output.clone());
                    output
                }
            };
            self.get_mut(modality)?.record_resampled(resampled);
        }
        Ok(done.into_values().collect())
    }

    /// Run the full stage sequence over every ingested measure:
    /// conversion and bias correction per measure, then registration and
    /// skull stripping (combined or per-measure), then optional
    /// resampling.
    pub async fn run_all(&mut self, resample: bool) -> Result<(), PipelineError> {
        info!(
            measures = self.measures.len(),
            full_modality = self.is_full_modality(),
            "starting generalisation"
        );

        for modality in self.present() {
            self.convert_stage(modality).await?;
            self.bias_correct_stage(modality).await?;
        }
        self.coregister_stage().await?;
        self.skull_strip_stage().await?;
        if resample {
            self.resample_stage()?;
        }

        for measure in self.measures.values() {
            info!(
                modality = %measure.modality,
                artifact = %measure.current.display(),
                "measure complete"
            );
        }
        Ok(())
    }

    fn present(&self) -> Vec<Modality> {
        self.measures.keys().copied().collect()
    }

    fn get(&self, modality: Modality) -> Result<&Measure, PipelineError> {
        self.measures
            .get(&modality)
            .ok_or(PipelineError::MissingModality(modality))
    }

    fn get_mut(&mut self, modality: Modality) -> Result<&mut Measure, PipelineError> {
        self.measures
            .get_mut(&modality)
            .ok_or(PipelineError::MissingModality(modality))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::fake_tool;
    use ndarray::Array3;
    use nifti::writer::WriterOptions;
    use std::fs;

    struct Fixture {
        tmp: tempfile::TempDir,
        work: PathBuf,
        log: PathBuf,
        pipeline: Generalisation,
    }

    // Every fake tool prepends a label and its argv to the shared log,
    // then creates whatever file the pipeline expects of it.
    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let work = root.join("derived");
        let log = root.join("calls.log");

        let converter_body = format!(
            r#"
echo dcm2niix "$@" >> {log}
prev=""
name=""
for a in "$@"; do
  if [ "$prev" = "-f" ]; then name="$a"; fi
  prev="$a"
done
touch "$prev/$name.nii.gz"
"#,
            log = log.display()
        );
        let bias_body = format!(
            r#"
echo n4 "$@" >> {log}
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then touch "$a"; fi
  prev="$a"
done
"#,
            log = log.display()
        );
        let toolkit_body = format!(
            r#"
echo captk "$@" >> {log}
prev=""
out=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
if [ "$1" = "BraTSPipeline.cwl" ]; then
  touch "$out/t1_to_sri.nii.gz" "$out/t1ce_to_sri.nii.gz" "$out/t2_to_sri.nii.gz" "$out/flair_to_sri.nii.gz"
else
  touch "$out"
fi
"#,
            log = log.display()
        );
        let strip_single_body = format!(
            r#"
echo strip1 "$@" >> {log}
prev=""
for a in "$@"; do
  case "$prev" in
    -o|-m) touch "$a" ;;
  esac
  prev="$a"
done
"#,
            log = log.display()
        );
        let strip_multi_body = format!(
            r#"
echo strip4 "$@" >> {log}
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then touch "$a"; fi
  prev="$a"
done
"#,
            log = log.display()
        );

        let atlas_t1 = root.join("T1_brain.nii");
        let atlas_t2 = root.join("T2_brain.nii");
        fs::write(&atlas_t1, b"").unwrap();
        fs::write(&atlas_t2, b"").unwrap();

        let config = PipelineConfig {
            work_dir: work.clone(),
            atlas_t1,
            atlas_t2,
            toolkit: fake_tool(root, "captk", &toolkit_body),
            converter: fake_tool(root, "dcm2niix", &converter_body),
            bias_corrector: fake_tool(root, "N4BiasFieldCorrection", &bias_body),
            strip_single: fake_tool(root, "brain_mage_single_run", &strip_single_body),
            strip_multi: fake_tool(root, "brain_mage_single_run_multi_4", &strip_multi_body),
            device: "cpu".to_string(),
            timeout_secs: 10,
            target_shape: [4, 4, 4],
        };
        let pipeline = Generalisation::new(&config);
        Fixture { tmp, work, log, pipeline }
    }

    fn series_dir(fixture: &Fixture, modality: Modality) -> PathBuf {
        let dir = fixture.tmp.path().join("dicom").join(modality.name());
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn ingest(fixture: &mut Fixture, modality: Modality) {
        let dir = series_dir(fixture, modality);
        fixture.pipeline.insert(Measure::new(modality, dir));
    }

    fn log_lines(fixture: &Fixture, tool: &str) -> Vec<String> {
        fs::read_to_string(&fixture.log)
            .unwrap_or_default()
            .lines()
            .filter(|line| line.starts_with(tool))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn full_modality_tracks_the_live_measure_map() {
        let mut fixture = fixture();
        for modality in [Modality::T1, Modality::T1ce, Modality::T2] {
            ingest(&mut fixture, modality);
            assert!(!fixture.pipeline.is_full_modality());
        }
        ingest(&mut fixture, Modality::Flair);
        assert!(fixture.pipeline.is_full_modality());

        fixture.pipeline.remove(Modality::T2);
        assert!(!fixture.pipeline.is_full_modality());

        ingest(&mut fixture, Modality::T2);
        ingest(&mut fixture, Modality::Seg);
        assert!(fixture.pipeline.is_full_modality());
    }

    #[tokio::test]
    async fn stages_reject_a_modality_that_was_never_ingested() {
        let mut fixture = fixture();
        let result = fixture.pipeline.convert_stage(Modality::T2).await;
        assert!(matches!(result, Err(PipelineError::MissingModality(Modality::T2))));
    }

    #[tokio::test]
    async fn all_four_modalities_go_through_the_combined_tools() {
        let mut fixture = fixture();
        for modality in Modality::ANATOMICAL {
            ingest(&mut fixture, modality);
        }

        fixture.pipeline.run_all(false).await.unwrap();

        let work = fixture.work.display().to_string();
        let captk = log_lines(&fixture, "captk");
        let expected = format!(
            "captk BraTSPipeline.cwl -t1 {work}/t1_bc.nii.gz -t1c {work}/t1ce_bc.nii.gz \
             -t2 {work}/t2_bc.nii.gz -fl {work}/flair_bc.nii.gz -o {work} -s 0 -b 0"
        );
        assert_eq!(captk, vec![expected]);

        let strip4 = log_lines(&fixture, "strip4");
        let expected = format!(
            "strip4 -i {work}/t1_to_sri.nii.gz -i {work}/t2_to_sri.nii.gz \
             -i {work}/t1ce_to_sri.nii.gz -i {work}/flair_to_sri.nii.gz \
             -o {work}/brain_mask.nii.gz -dev cpu"
        );
        assert_eq!(strip4, vec![expected]);
        assert!(log_lines(&fixture, "strip1").is_empty());

        assert_eq!(log_lines(&fixture, "dcm2niix").len(), 4);
        assert_eq!(log_lines(&fixture, "n4").len(), 4);

        let mask = fixture.work.join("brain_mask.nii.gz");
        assert!(mask.exists());
        for measure in fixture.pipeline.measures() {
            assert_eq!(measure.current, mask);
            assert_eq!(
                measure.coregistered.as_deref(),
                Some(fixture.work.join(format!("{}_to_sri.nii.gz", measure.modality)).as_path())
            );
            assert!(measure.skull_stripped.is_none());
        }
    }

    #[tokio::test]
    async fn a_partial_study_falls_back_to_single_volume_tools() {
        let mut fixture = fixture();
        ingest(&mut fixture, Modality::T1);
        ingest(&mut fixture, Modality::Flair);

        fixture.pipeline.run_all(false).await.unwrap();

        let work = fixture.work.display().to_string();
        let root = fixture.tmp.path();
        let captk = log_lines(&fixture, "captk");
        assert_eq!(captk.len(), 2);
        for (line, modality) in captk.iter().zip(["t1", "flair"]) {
            let expected = format!(
                "captk Preprocessing.cwl -i {work}/{modality}_bc.nii.gz \
                 -rFI {atlas} -o {work}/{modality}_bc_to_SRI.nii.gz -reg RIGID",
                atlas = root.join("T1_brain.nii").display()
            );
            assert_eq!(line, &expected);
        }

        let strip1 = log_lines(&fixture, "strip1");
        assert_eq!(strip1.len(), 2);
        for (line, modality) in strip1.iter().zip(["t1", "flair"]) {
            let expected = format!(
                "strip1 -i {work}/{modality}_bc_to_SRI.nii.gz \
                 -o {work}/{modality}_bc_to_SRI_sks.nii.gz \
                 -m {work}/{modality}_bc_to_SRI_brain.nii.gz -dev cpu"
            );
            assert_eq!(line, &expected);
        }
        assert!(log_lines(&fixture, "strip4").is_empty());

        let t1 = fixture.pipeline.measure(Modality::T1).unwrap();
        assert_eq!(t1.converted.as_deref(), Some(fixture.work.join("t1.nii.gz").as_path()));
        assert_eq!(
            t1.bias_corrected.as_deref(),
            Some(fixture.work.join("t1_bc.nii.gz").as_path())
        );
        assert_eq!(
            t1.coregistered.as_deref(),
            Some(fixture.work.join("t1_bc_to_SRI.nii.gz").as_path())
        );
        assert_eq!(
            t1.skull_stripped.as_deref(),
            Some(fixture.work.join("t1_bc_to_SRI_sks.nii.gz").as_path())
        );
        assert_eq!(t1.current, fixture.work.join("t1_bc_to_SRI_brain.nii.gz"));
    }

    #[tokio::test]
    async fn a_failed_stage_leaves_the_measure_untouched() {
        let mut fixture = fixture();
        ingest(&mut fixture, Modality::T1);
        fixture.pipeline.bias.executable = fake_tool(fixture.tmp.path(), "n4_broken", "exit 1");

        let converted = fixture.pipeline.convert_stage(Modality::T1).await.unwrap();
        let result = fixture.pipeline.bias_correct_stage(Modality::T1).await;
        assert!(matches!(result, Err(PipelineError::ToolFailed { .. })));

        let measure = fixture.pipeline.measure(Modality::T1).unwrap();
        assert_eq!(measure.current, converted);
        assert!(measure.bias_corrected.is_none());
    }

    #[tokio::test]
    async fn bias_correction_requires_a_prior_conversion() {
        let mut fixture = fixture();
        ingest(&mut fixture, Modality::T2);

        let result = fixture.pipeline.bias_correct_stage(Modality::T2).await;
        assert!(matches!(result, Err(PipelineError::StageOrder(_))));
    }

    #[test]
    fn resampling_handles_a_shared_artifact_once() {
        let mut fixture = fixture();
        let mask = fixture.tmp.path().join("mask.nii.gz");
        let volume = Array3::<f32>::from_elem((8, 8, 8), 1.0);
        WriterOptions::new(&mask).write_nifti(&volume).unwrap();

        for modality in [Modality::T1, Modality::T2] {
            let dir = series_dir(&fixture, modality);
            let mut measure = Measure::new(modality, dir);
            measure.current = mask.clone();
            fixture.pipeline.insert(measure);
        }

        let produced = fixture.pipeline.resample_stage().unwrap();
        let expected = fixture.work.join("mask_res.nii.gz");
        assert_eq!(produced, vec![expected.clone()]);
        assert!(expected.exists());
        for measure in fixture.pipeline.measures() {
            assert_eq!(measure.current, expected);
        }
    }
}
