use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::augment::ClassTopUp;
use crate::cache::ProcessedData;
use crate::data::model::{LesionClass, NUM_CLASSES};
use crate::error::{PrepError, PrepResult};

/// Log one line per class: index, code, count.
pub fn log_distribution(title: &str, counts: &[usize; NUM_CLASSES]) {
    info!("{title}:");
    for class in LesionClass::ALL {
        info!(
            "  class {} ({:<5}) {:>6} sample(s)",
            class.index(),
            class.code(),
            counts[class.index()]
        );
    }
}

/// Summary written next to the cached tensors.
#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub train_total: usize,
    pub test_total: usize,
    pub train_counts: BTreeMap<&'static str, usize>,
    pub test_counts: BTreeMap<&'static str, usize>,
    pub top_up: Vec<ClassTopUp>,
}

fn by_code(counts: [usize; NUM_CLASSES]) -> BTreeMap<&'static str, usize> {
    LesionClass::ALL
        .into_iter()
        .map(|c| (c.code(), counts[c.index()]))
        .collect()
}

impl ClassReport {
    pub fn new(data: &ProcessedData, top_up: Vec<ClassTopUp>) -> Self {
        Self {
            train_total: data.train.len(),
            test_total: data.test.len(),
            train_counts: by_code(data.train.class_counts()),
            test_counts: by_code(data.test.class_counts()),
            top_up,
        }
    }

    pub fn save(&self, path: &Path) -> PrepResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| PrepError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|e| PrepError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{ImageTensor, LabeledDataset};

    #[test]
    fn report_counts_by_code() {
        let mut train = LabeledDataset::default();
        train.push(ImageTensor::zeros(3, 1, 1), LesionClass::Vasc);
        train.push(ImageTensor::zeros(3, 1, 1), LesionClass::Vasc);
        let data = ProcessedData {
            train,
            test: LabeledDataset::default(),
        };
        let report = ClassReport::new(&data, Vec::new());
        assert_eq!(report.train_total, 2);
        assert_eq!(report.train_counts["vasc"], 2);
        assert_eq!(report.train_counts["nv"], 0);
        assert_eq!(report.test_counts.len(), NUM_CLASSES);

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("class_report.json");
        report.save(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["train_counts"]["vasc"], 2);
    }
}
