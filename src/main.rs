use std::path::PathBuf;

use clap::Parser;
use lesion_prep::{pipeline, PipelineConfig, UnmatchedPolicy};

#[derive(Parser, Debug)]
#[command(
    name = "lesion-prep",
    about = "Prepare HAM10000 train/test tensors (cached between runs)"
)]
struct Args {
    /// TOML config file (defaults to $LESION_PREP_CONFIG, then built-in values).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding the metadata CSV and HAM10000_images_part_* folders.
    #[arg(long)]
    dataset_dir: Option<PathBuf>,
    /// Output directory for the cached tensors.
    #[arg(long)]
    processed_dir: Option<PathBuf>,
    /// Samples per minority class after augmentation.
    #[arg(long)]
    target_samples: Option<usize>,
    /// Square image side length in pixels.
    #[arg(long)]
    image_size: Option<u32>,
    /// Seed for the split, augmentation and shuffle.
    #[arg(long)]
    seed: Option<u64>,
    /// What to do with metadata rows that have no image file.
    #[arg(long, value_enum)]
    unmatched: Option<UnmatchedPolicy>,
    /// Recompute even if cached tensors exist.
    #[arg(long)]
    force: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(PipelineConfig, bool)> {
        let mut cfg = PipelineConfig::load(self.config.as_deref())?;
        if let Some(v) = self.dataset_dir {
            cfg.dataset_dir = v;
        }
        if let Some(v) = self.processed_dir {
            cfg.processed_dir = v;
        }
        if let Some(v) = self.target_samples {
            cfg.target_samples = v;
        }
        if let Some(v) = self.image_size {
            cfg.image_size = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if let Some(v) = self.unmatched {
            cfg.unmatched = v;
        }
        Ok((cfg, self.force))
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (cfg, force) = Args::parse().into_config()?;
    log::debug!("config: {cfg:?}");
    let data = pipeline::run(&cfg, force)?;
    log::info!(
        "ready for training: train={} test={}",
        data.train.len(),
        data.test.len()
    );
    Ok(())
}
