use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brain_prep::config::PipelineConfig;
use brain_prep::enums::Modality;
use brain_prep::generalisation::Generalisation;
use brain_prep::measure::Measure;

/// Preprocess one patient study of brain MRI series into atlas-aligned,
/// skull-stripped volumes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pipeline configuration file
    #[arg(short, long, default_value = "brain-prep.toml")]
    config: PathBuf,

    /// DICOM series directory of the t1 acquisition
    #[arg(long, value_name = "DIR")]
    t1: Option<PathBuf>,

    /// DICOM series directory of the contrast-enhanced t1 acquisition
    #[arg(long, value_name = "DIR")]
    t1ce: Option<PathBuf>,

    /// DICOM series directory of the t2 acquisition
    #[arg(long, value_name = "DIR")]
    t2: Option<PathBuf>,

    /// DICOM series directory of the flair acquisition
    #[arg(long, value_name = "DIR")]
    flair: Option<PathBuf>,

    /// Override the configured work directory
    #[arg(short, long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Resample the final artifacts onto the standard grid
    #[arg(short, long)]
    resample: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("brain_prep=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let series = [
        (Modality::T1, args.t1),
        (Modality::T1ce, args.t1ce),
        (Modality::T2, args.t2),
        (Modality::Flair, args.flair),
    ];
    if series.iter().all(|(_, dir)| dir.is_none()) {
        anyhow::bail!("no series given; pass at least one of --t1, --t1ce, --t2, --flair");
    }

    let mut config = PipelineConfig::from_file(&args.config)?;
    if let Some(work_dir) = args.work_dir {
        config.work_dir = work_dir;
    }
    config.validate()?;

    let mut generalisation = Generalisation::new(&config);
    for (modality, dir) in series {
        let Some(dir) = dir else { continue };
        let measure = Measure::from_dicom_dir(modality, &dir)?;
        match (&measure.subject_id, &measure.acquired) {
            (Some(subject), Some(date)) => {
                tracing::info!(%modality, %subject, %date, "ingested series")
            }
            _ => tracing::info!(%modality, dir = %dir.display(), "ingested series"),
        }
        generalisation.insert(measure);
    }

    generalisation.run_all(args.resample).await?;
    Ok(())
}
