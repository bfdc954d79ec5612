use std::path::PathBuf;

use thiserror::Error;

pub type PrepResult<T> = Result<T, PrepError>;

/// Domain failures raised by the preparation library.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path}: missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: String },
    #[error("{path}, row {row}: unknown diagnosis code '{code}'")]
    UnknownDiagnosis {
        path: PathBuf,
        row: usize,
        code: String,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{count} record(s) have no image file (first: {})", .examples.join(", "))]
    UnmatchedImages { count: usize, examples: Vec<String> },
    #[error("corrupt tensor cache {path}: {msg}")]
    Cache { path: PathBuf, msg: String },
    #[error("images and labels differ in length ({images} vs {labels})")]
    LengthMismatch { images: usize, labels: usize },
    #[error("json error writing {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("record {image_id} has no resolved image path")]
    MissingImagePath { image_id: String },
    #[error("tensor shape mismatch: {0}")]
    Shape(String),
    #[error("invalid permutation: {0}")]
    Permutation(String),
    #[error("invalid config: {0}")]
    Config(String),
}

impl PrepError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn cache(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        PrepError::Cache {
            path: path.into(),
            msg: msg.into(),
        }
    }
}
