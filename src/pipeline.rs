//! Step-by-step orchestration: cache gate, then merge → decode → split →
//! top-up → persist.

use anyhow::{Context, Result};
use log::info;

use crate::augment::{balance_minority_classes, AugmentPipeline, ClassTopUp};
use crate::cache::{self, ProcessedData};
use crate::config::PipelineConfig;
use crate::data::filter::resolve_unmatched;
use crate::data::loader::{attach_paths, discover_images, impute_missing_age, read_metadata};
use crate::data::model::{LabeledDataset, LesionClass, Record};
use crate::images::materialize;
use crate::report::{log_distribution, ClassReport};
use crate::split::stratified_split;

fn banner(title: &str) {
    let rule = "=".repeat(50);
    info!("{rule}");
    info!("{title}");
    info!("{rule}");
}

/// Return cached tensors when present, otherwise build and cache them.
/// `force` skips the cache lookup.
pub fn run(cfg: &PipelineConfig, force: bool) -> Result<ProcessedData> {
    cfg.validate()?;
    std::fs::create_dir_all(&cfg.processed_dir)
        .with_context(|| format!("creating {}", cfg.processed_dir.display()))?;

    banner("STEP 0: cached tensors");
    if !force {
        if let Some(data) = cache::check_cache(cfg)? {
            log_distribution("training set class distribution", &data.train.class_counts());
            return Ok(data);
        }
    } else {
        info!("--force given; ignoring any cached tensors");
    }

    let data = process(cfg)?;
    banner("DATA PREPARATION COMPLETE");
    Ok(data)
}

/// Full recomputation, ending with both bundles and the class report on disk.
pub fn process(cfg: &PipelineConfig) -> Result<ProcessedData> {
    banner("STEP 1: metadata and image paths");
    let records = load_records(cfg)?;
    info!("{} record(s) ready", records.len());

    banner("STEP 2: image decoding");
    let images = materialize(&records, cfg.image_size).context("decoding images")?;
    let labels: Vec<LesionClass> = records.iter().map(|r| r.class).collect();

    banner("STEP 3: stratified train/test split");
    let split = stratified_split(&labels, cfg.test_fraction, cfg.seed);
    let (train, test) = split.apply(images, labels)?;
    info!("train={} test={}", train.len(), test.len());
    log_distribution("training set before augmentation", &train.class_counts());

    banner("STEP 4: minority-class augmentation");
    let (train, top_up) = augment(cfg, train)?;
    log_distribution("training set after augmentation", &train.class_counts());

    banner("STEP 5: saving tensors");
    let data = ProcessedData { train, test };
    cache::store(cfg, &data)?;
    ClassReport::new(&data, top_up)
        .save(&cfg.class_report())
        .context("writing class report")?;
    Ok(data)
}

/// Metadata rows joined with their image files, ages imputed, unmatched rows
/// handled per the configured policy.
pub fn load_records(cfg: &PipelineConfig) -> Result<Vec<Record>> {
    let meta_path = cfg.metadata_path();
    let mut records = read_metadata(&meta_path)
        .with_context(|| format!("loading metadata {}", meta_path.display()))?;
    info!("{} metadata row(s) in {}", records.len(), meta_path.display());

    let index = discover_images(&cfg.dataset_dir, &cfg.image_dir_prefix)?;
    info!(
        "{} image file(s) under {}",
        index.len(),
        cfg.dataset_dir.display()
    );
    let unmatched = attach_paths(&mut records, &index);
    if let Some(mean) = impute_missing_age(&mut records) {
        info!("mean age {mean:.1} used for missing values");
    }
    if unmatched > 0 {
        info!("{unmatched} record(s) without an image file; policy={:?}", cfg.unmatched);
    }
    Ok(resolve_unmatched(records, cfg.unmatched)?)
}

fn augment(cfg: &PipelineConfig, train: LabeledDataset) -> Result<(LabeledDataset, Vec<ClassTopUp>)> {
    info!(
        "topping minority classes up to {} sample(s)",
        cfg.target_samples
    );
    let pipeline = AugmentPipeline::from_config(&cfg.augment);
    Ok(balance_minority_classes(
        train,
        cfg.target_samples,
        &pipeline,
        cfg.seed,
    )?)
}
