//! HAM10000 dataset preparation.
//!
//! Loads lesion metadata, decodes and resizes the images, makes a seeded
//! stratified train/test split, tops minority classes up by augmentation and
//! caches the resulting tensors so later runs can skip all of it.

pub mod augment;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod images;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod split;

pub use cache::ProcessedData;
pub use config::{AugmentConfig, PipelineConfig, UnmatchedPolicy};
pub use data::model::{ImageTensor, LabeledDataset, LesionClass, Record, NUM_CLASSES};
pub use error::{PrepError, PrepResult};
