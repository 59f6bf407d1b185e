use anyhow::Result;
use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use vseg_train::data::{NiftiVolumeSource, SyntheticVolumeSource, VolumeSource};
use vseg_train::{RunConfig, Trainer};

#[derive(Parser)]
#[command(name = "vseg-train")]
#[command(about = "Train or evaluate the V-Net volumetric segmentation model")]
struct Cli {
    /// Path to the run configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Directory of image_NNN/label_NNN/weight_NNN NIfTI volumes; a synthetic
    /// source is used when omitted
    #[arg(long)]
    data: Option<PathBuf>,

    /// Number of synthetic volumes
    #[arg(long, default_value_t = 15)]
    synthetic_volumes: usize,

    /// Edge length of synthetic volumes (must divide by 16)
    #[arg(long, default_value_t = 32)]
    synthetic_extent: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = RunConfig::load(&cli.config)?;

    let source: Box<dyn VolumeSource> = match &cli.data {
        Some(dir) => {
            info!("Reading volumes from {}", dir.display());
            Box::new(NiftiVolumeSource::open(dir.clone())?)
        }
        None => {
            info!(
                "Using {} synthetic volumes of extent {}",
                cli.synthetic_volumes, cli.synthetic_extent
            );
            Box::new(SyntheticVolumeSource::new(
                cli.synthetic_volumes,
                cli.synthetic_extent,
            ))
        }
    };

    type B = Autodiff<NdArray<f32>>;
    let device = Default::default();

    let report = Trainer::<B>::new(&config, source.as_ref(), device).run()?;
    info!(
        "Run complete: {} steps, final accuracy {:.3}",
        report.steps_completed, report.final_accuracy
    );
    Ok(())
}
