use crate::error::ReconError;
use crate::model::{Record, Schema};
use crate::store::BaseStore;

/// Insert/update split of a deduplicated incoming batch against the base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSplit {
    pub inserted: usize,
    pub updated: usize,
}

/// Join the batch against the base on key: matches become updates, the
/// remainder inserts.
///
/// Must run before the upsert; afterwards an updated record cannot be told
/// apart from one that was already there.
pub fn plan_merge<S: BaseStore + ?Sized>(
    base: &S,
    schema: &Schema,
    unique: &[&Record],
) -> Result<MergeSplit, ReconError> {
    let mut split = MergeSplit::default();
    for record in unique {
        if base.contains_key(schema.key_of(record))? {
            split.updated += 1;
        } else {
            split.inserted += 1;
        }
    }
    Ok(split)
}

/// Upsert every record of the deduplicated batch as a single store call.
///
/// Existing keys get a full-record replace, new keys are appended.
pub fn execute_merge<S: BaseStore + ?Sized>(
    base: &mut S,
    schema: &Schema,
    unique: &[&Record],
) -> Result<MergeSplit, ReconError> {
    let split = plan_merge(&*base, schema, unique)?;
    log::debug!(
        "merge plan: {} inserts, {} updates",
        split.inserted,
        split.updated
    );

    if unique.is_empty() {
        return Ok(split);
    }

    let batch: Vec<Record> = unique.iter().map(|r| (*r).clone()).collect();
    base.upsert_batch(&batch)?;
    Ok(split)
}
