use log::warn;

use super::model::Record;
use crate::config::UnmatchedPolicy;
use crate::error::{PrepError, PrepResult};

/// How many unmatched ids are named in warnings and errors.
const SHOWN_IDS: usize = 5;

/// Apply `policy` to records without a resolved image path.
///
/// * [`UnmatchedPolicy::Drop`] keeps only resolved records and warns with the
///   count and the first few ids.
/// * [`UnmatchedPolicy::Fail`] errors if any record is unresolved.
pub fn resolve_unmatched(records: Vec<Record>, policy: UnmatchedPolicy) -> PrepResult<Vec<Record>> {
    let examples: Vec<String> = records
        .iter()
        .filter(|r| r.path.is_none())
        .take(SHOWN_IDS)
        .map(|r| r.image_id.clone())
        .collect();
    if examples.is_empty() {
        return Ok(records);
    }
    let count = records.iter().filter(|r| r.path.is_none()).count();

    match policy {
        UnmatchedPolicy::Fail => Err(PrepError::UnmatchedImages { count, examples }),
        UnmatchedPolicy::Drop => {
            warn!(
                "dropping {count} record(s) with no image file (first: {})",
                examples.join(", ")
            );
            Ok(records.into_iter().filter(|r| r.path.is_some()).collect())
        }
    }
}
