use std::collections::HashMap;

use crate::error::ReconError;
use crate::model::{Record, Schema, StoredRecord};
use crate::store::BaseStore;

// ---------------------------------------------------------------------------
// Base
// ---------------------------------------------------------------------------

/// Remove same-key duplicates from the base, keeping the lowest `seq` per key.
///
/// Returns the number of records removed. A base with unique keys is left
/// untouched and reports zero.
pub fn dedup_base<S: BaseStore + ?Sized>(base: &mut S) -> Result<usize, ReconError> {
    let schema = base.schema()?;
    let rows = base.rows()?;
    let losers = duplicate_seqs(&schema, &rows);

    if losers.is_empty() {
        log::debug!("base dedup: {} rows, keys already unique", rows.len());
        return Ok(0);
    }

    let removed = base.delete_seqs(&losers)?;
    if removed != losers.len() {
        return Err(ReconError::StorageFailure(format!(
            "base dedup deleted {removed} of {} duplicate rows",
            losers.len()
        )));
    }

    log::warn!("base dedup: removed {removed} duplicate rows");
    Ok(removed)
}

/// `seq` of every record that is not the first-inserted one for its key.
pub fn duplicate_seqs(schema: &Schema, rows: &[StoredRecord]) -> Vec<u64> {
    let mut survivors: HashMap<&str, u64> = HashMap::with_capacity(rows.len());
    let mut losers = Vec::new();

    for row in rows {
        let key = schema.key_of(&row.record);
        match survivors.get_mut(key) {
            Some(kept) if row.seq < *kept => {
                losers.push(*kept);
                *kept = row.seq;
            }
            Some(_) => losers.push(row.seq),
            None => {
                survivors.insert(key, row.seq);
            }
        }
    }

    losers.sort_unstable();
    losers
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// One record per key, ordered by key.
///
/// Stable sort on the key alone, then keep the first of each run: among
/// same-key records the earliest in input order survives. The input is not
/// modified.
pub fn dedup_incoming<'a>(schema: &Schema, records: &'a [Record]) -> Vec<&'a Record> {
    let mut unique: Vec<&Record> = records.iter().collect();
    unique.sort_by(|a, b| schema.key_of(a).cmp(schema.key_of(b)));
    unique.dedup_by(|later, earlier| schema.key_of(later) == schema.key_of(earlier));
    unique
}
