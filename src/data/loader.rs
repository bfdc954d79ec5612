use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use super::model::{LesionClass, MetadataValue, Record};
use crate::error::{PrepError, PrepResult};

// ---------------------------------------------------------------------------
// Metadata CSV
// ---------------------------------------------------------------------------

/// Read the metadata table. Paths are left unresolved and ages unimputed;
/// see [`attach_paths`] and [`impute_missing_age`].
///
/// Layout: header row, required `image_id` and `dx` columns, optional `age`.
/// All other columns are kept as passthrough metadata.
pub fn read_metadata(path: &Path) -> PrepResult<Vec<Record>> {
    let csv_err = |source| PrepError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let column = |name: &str| -> PrepResult<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PrepError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    };
    let id_idx = column("image_id")?;
    let dx_idx = column("dx")?;
    let age_idx = headers.iter().position(|h| h == "age");

    let mut records = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let row = result.map_err(csv_err)?;
        // 1-based data row, header excluded
        let row_no = row_no + 1;

        let code = row.get(dx_idx).unwrap_or("");
        let class: LesionClass = code.parse().map_err(|code| PrepError::UnknownDiagnosis {
            path: path.to_path_buf(),
            row: row_no,
            code,
        })?;

        let age = age_idx
            .and_then(|i| row.get(i))
            .and_then(|s| MetadataValue::guess(s.trim()).as_f64())
            .filter(|a| a.is_finite());

        let mut metadata = BTreeMap::new();
        for (col_idx, value) in row.iter().enumerate() {
            if col_idx == id_idx || col_idx == dx_idx || Some(col_idx) == age_idx {
                continue;
            }
            metadata.insert(headers[col_idx].clone(), MetadataValue::guess(value.trim()));
        }

        records.push(Record {
            image_id: row.get(id_idx).unwrap_or("").trim().to_string(),
            class,
            path: None,
            age,
            metadata,
        });
    }

    debug!("read {} metadata rows from {}", records.len(), path.display());
    Ok(records)
}

/// Replace missing ages by the mean over the rows that have one. Returns the
/// mean used, or `None` when no row has an age.
pub fn impute_missing_age(records: &mut [Record]) -> Option<f64> {
    let (sum, n) = records
        .iter()
        .filter_map(|r| r.age)
        .fold((0.0f64, 0usize), |(s, n), a| (s + a, n + 1));
    if n == 0 {
        return None;
    }
    let mean = sum / n as f64;
    let mut filled = 0usize;
    for r in records.iter_mut().filter(|r| r.age.is_none()) {
        r.age = Some(mean);
        filled += 1;
    }
    if filled > 0 {
        debug!("imputed age {mean:.2} for {filled} row(s)");
    }
    Some(mean)
}

// ---------------------------------------------------------------------------
// Image discovery
// ---------------------------------------------------------------------------

/// Map image stem → path for every `.jpg` directly inside a directory of
/// `root` whose name starts with `dir_prefix`. Walk order is sorted, so the
/// first of two files sharing a stem wins.
pub fn discover_images(root: &Path, dir_prefix: &str) -> PrepResult<BTreeMap<String, PathBuf>> {
    let mut index: BTreeMap<String, PathBuf> = BTreeMap::new();
    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            PrepError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let in_image_dir = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(dir_prefix));
        let is_jpg = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jpg"));
        if !in_image_dir || !is_jpg {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(existing) = index.get(stem) {
            warn!(
                "duplicate image id {stem}: keeping {}, ignoring {}",
                existing.display(),
                path.display()
            );
            continue;
        }
        index.insert(stem.to_string(), path.to_path_buf());
    }
    Ok(index)
}

/// Resolve each record's image path by `image_id`. Returns how many records
/// stayed unresolved.
pub fn attach_paths(records: &mut [Record], images: &BTreeMap<String, PathBuf>) -> usize {
    let mut unmatched = 0;
    for r in records.iter_mut() {
        r.path = images.get(&r.image_id).cloned();
        if r.path.is_none() {
            unmatched += 1;
        }
    }
    unmatched
}
