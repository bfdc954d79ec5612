use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PrepError, PrepResult};

pub const CONFIG_ENV: &str = "LESION_PREP_CONFIG";

pub const TRAIN_ARTIFACT: &str = "train_tensors.bin";
pub const TEST_ARTIFACT: &str = "test_tensors.bin";
pub const CLASS_REPORT: &str = "class_report.json";

/// What to do with metadata rows whose `image_id` has no image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    /// Drop the rows and log a warning naming them.
    #[default]
    Drop,
    /// Abort the run.
    Fail,
}

/// Randomized transform parameters for minority-class top-up.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub flip_prob: f32,
    /// Rotation range in degrees, sampled uniformly from `[-r, r]`.
    pub rotation_degrees: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// Hue shift as a fraction of a full turn, at most 0.5.
    pub hue: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            flip_prob: 0.5,
            rotation_degrees: 10.0,
            brightness: 0.1,
            contrast: 0.1,
            saturation: 0.1,
            hue: 0.05,
        }
    }
}

/// Everything the pipeline needs, fixed for the duration of a run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// Metadata CSV name, relative to `dataset_dir`.
    pub metadata_file: String,
    /// Image directories are the ones whose name starts with this prefix.
    pub image_dir_prefix: String,
    pub image_size: u32,
    pub target_samples: usize,
    pub test_fraction: f64,
    pub seed: u64,
    pub unmatched: UnmatchedPolicy,
    /// Treat an unreadable cache as a miss instead of aborting.
    pub recompute_on_corrupt_cache: bool,
    pub augment: AugmentConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("dataset"),
            processed_dir: PathBuf::from("processed_data"),
            metadata_file: "HAM10000_metadata.csv".to_string(),
            image_dir_prefix: "HAM10000_images_part_".to_string(),
            image_size: 224,
            target_samples: 2000,
            test_fraction: 0.2,
            seed: 42,
            unmatched: UnmatchedPolicy::Drop,
            recompute_on_corrupt_cache: false,
            augment: AugmentConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit file, else from `$LESION_PREP_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> PrepResult<Self> {
        if let Some(path) = path {
            return Self::from_path(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            if !env_path.trim().is_empty() {
                return Self::from_path(Path::new(&env_path));
            }
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> PrepResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
        Self::from_toml(&raw)
            .map_err(|e| PrepError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> PrepResult<Self> {
        toml::from_str(raw).map_err(|e| PrepError::Config(e.to_string()))
    }

    pub fn validate(&self) -> PrepResult<()> {
        if self.image_size == 0 {
            return Err(PrepError::Config("image_size must be positive".into()));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(PrepError::Config(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        let a = &self.augment;
        if !(0.0..=1.0).contains(&a.flip_prob) {
            return Err(PrepError::Config(format!(
                "augment.flip_prob must be in [0, 1], got {}",
                a.flip_prob
            )));
        }
        for (name, v) in [
            ("rotation_degrees", a.rotation_degrees),
            ("brightness", a.brightness),
            ("contrast", a.contrast),
            ("saturation", a.saturation),
            ("hue", a.hue),
        ] {
            if !(v >= 0.0) {
                return Err(PrepError::Config(format!(
                    "augment.{name} must be non-negative, got {v}"
                )));
            }
        }
        if a.hue > 0.5 {
            return Err(PrepError::Config(format!(
                "augment.hue must be at most 0.5, got {}",
                a.hue
            )));
        }
        Ok(())
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dataset_dir.join(&self.metadata_file)
    }

    pub fn train_artifact(&self) -> PathBuf {
        self.processed_dir.join(TRAIN_ARTIFACT)
    }

    pub fn test_artifact(&self) -> PathBuf {
        self.processed_dir.join(TEST_ARTIFACT)
    }

    pub fn class_report(&self) -> PathBuf {
        self.processed_dir.join(CLASS_REPORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.image_size, 224);
        assert_eq!(cfg.target_samples, 2000);
        assert_eq!(cfg.seed, 42);
        assert!((cfg.test_fraction - 0.2).abs() < 1e-12);
        assert_eq!(cfg.unmatched, UnmatchedPolicy::Drop);
        assert_eq!(cfg.train_artifact(), PathBuf::from("processed_data/train_tensors.bin"));
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PipelineConfig::from_toml(
            r#"
            target_samples = 50
            unmatched = "fail"

            [augment]
            hue = 0.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.target_samples, 50);
        assert_eq!(cfg.unmatched, UnmatchedPolicy::Fail);
        assert_eq!(cfg.augment.hue, 0.0);
        assert_eq!(cfg.augment.rotation_degrees, 10.0);
        assert_eq!(cfg.image_size, 224);
    }

    #[test]
    fn shipped_example_config_is_the_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("lesion-prep.example.toml");
        assert_eq!(PipelineConfig::from_path(&path).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = PipelineConfig::default();
        cfg.test_fraction = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.augment.hue = 0.6;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.augment.brightness = -0.1;
        assert!(cfg.validate().is_err());

        assert!(PipelineConfig::from_toml("image_size = \"big\"").is_err());
    }
}
