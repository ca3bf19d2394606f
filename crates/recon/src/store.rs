use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::model::{Record, RecordSet, Schema, StoredRecord};

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Durable target of a reconciliation run.
///
/// The reconciler takes `&mut` access for the whole run and brackets every
/// mutation between `begin` and `commit`/`rollback`. Implementations must
/// leave the store exactly as it was at `begin` after a `rollback`.
pub trait BaseStore {
    fn schema(&self) -> Result<Schema, ReconError>;

    fn count(&self) -> Result<usize, ReconError>;

    /// All records in ascending `seq` order.
    fn rows(&self) -> Result<Vec<StoredRecord>, ReconError>;

    fn contains_key(&self, key: &str) -> Result<bool, ReconError>;

    /// Delete records by `seq`. Returns how many were removed.
    fn delete_seqs(&mut self, seqs: &[u64]) -> Result<usize, ReconError>;

    fn has_constraint(&self, name: &str) -> Result<bool, ReconError>;

    /// Returns whether a constraint of that name existed.
    fn drop_constraint(&mut self, name: &str) -> Result<bool, ReconError>;

    /// Add a named uniqueness constraint on the key column.
    ///
    /// Fails with `ConstraintViolation` if any key occurs more than once.
    fn add_unique_constraint(&mut self, name: &str) -> Result<(), ReconError>;

    /// Insert-or-replace by key. Requires an active uniqueness constraint,
    /// which is the conflict target.
    fn upsert_batch(&mut self, records: &[Record]) -> Result<(), ReconError>;

    fn begin(&mut self) -> Result<(), ReconError>;

    fn commit(&mut self) -> Result<(), ReconError>;

    fn rollback(&mut self) -> Result<(), ReconError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Serializable image of a `MemoryBase`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub schema: Schema,
    pub rows: Vec<StoredRecord>,
    pub next_seq: u64,
    pub constraints: Vec<String>,
}

/// Base store held in process memory.
#[derive(Debug, Clone)]
pub struct MemoryBase {
    schema: Schema,
    rows: BTreeMap<u64, Record>,
    by_key: HashMap<String, Vec<u64>>,
    next_seq: u64,
    constraints: BTreeSet<String>,
    pending: Option<MemorySnapshot>,
}

impl MemoryBase {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            by_key: HashMap::new(),
            next_seq: 1,
            constraints: BTreeSet::new(),
            pending: None,
        }
    }

    /// Load records in order. Duplicate keys are kept; no constraint is active.
    pub fn from_record_set(set: RecordSet) -> Self {
        let mut base = Self::new(set.schema().clone());
        for record in set.records() {
            base.insert(record.clone());
        }
        base
    }

    /// Records in insertion order.
    pub fn records(&self) -> Vec<Record> {
        self.rows.values().cloned().collect()
    }

    pub fn constraints(&self) -> impl Iterator<Item = &str> {
        self.constraints.iter().map(String::as_str)
    }

    pub fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            schema: self.schema.clone(),
            rows: self
                .rows
                .iter()
                .map(|(seq, record)| StoredRecord {
                    seq: *seq,
                    record: record.clone(),
                })
                .collect(),
            next_seq: self.next_seq,
            constraints: self.constraints.iter().cloned().collect(),
        }
    }

    pub fn restore(snapshot: MemorySnapshot) -> Self {
        let mut base = Self::new(snapshot.schema);
        for stored in snapshot.rows {
            let key = base.schema.key_of(&stored.record).to_string();
            base.by_key.entry(key).or_default().push(stored.seq);
            base.rows.insert(stored.seq, stored.record);
        }
        let max_seq = base.rows.keys().next_back().map_or(0, |s| *s);
        base.next_seq = snapshot.next_seq.max(max_seq + 1);
        base.constraints = snapshot.constraints.into_iter().collect();
        base
    }

    fn insert(&mut self, record: Record) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.schema.key_of(&record).to_string();
        self.by_key.entry(key).or_default().push(seq);
        self.rows.insert(seq, record);
        seq
    }

    fn first_duplicate(&self) -> Option<(&str, usize)> {
        self.by_key
            .iter()
            .filter(|(_, seqs)| seqs.len() > 1)
            .map(|(key, seqs)| (key.as_str(), seqs.len()))
            .min()
    }
}

impl BaseStore for MemoryBase {
    fn schema(&self) -> Result<Schema, ReconError> {
        Ok(self.schema.clone())
    }

    fn count(&self) -> Result<usize, ReconError> {
        Ok(self.rows.len())
    }

    fn rows(&self) -> Result<Vec<StoredRecord>, ReconError> {
        Ok(self.snapshot().rows)
    }

    fn contains_key(&self, key: &str) -> Result<bool, ReconError> {
        Ok(self.by_key.contains_key(key))
    }

    fn delete_seqs(&mut self, seqs: &[u64]) -> Result<usize, ReconError> {
        let mut removed = 0;
        for seq in seqs {
            let Some(record) = self.rows.remove(seq) else {
                continue;
            };
            removed += 1;
            let key = self.schema.key_of(&record);
            if let Some(key_seqs) = self.by_key.get_mut(key) {
                key_seqs.retain(|s| s != seq);
                if key_seqs.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        Ok(removed)
    }

    fn has_constraint(&self, name: &str) -> Result<bool, ReconError> {
        Ok(self.constraints.contains(name))
    }

    fn drop_constraint(&mut self, name: &str) -> Result<bool, ReconError> {
        Ok(self.constraints.remove(name))
    }

    fn add_unique_constraint(&mut self, name: &str) -> Result<(), ReconError> {
        if self.constraints.contains(name) {
            return Err(ReconError::StorageFailure(format!(
                "constraint '{name}' already exists"
            )));
        }
        if let Some((key, count)) = self.first_duplicate() {
            return Err(ReconError::ConstraintViolation {
                constraint: name.to_string(),
                key: key.to_string(),
                count,
            });
        }
        self.constraints.insert(name.to_string());
        Ok(())
    }

    fn upsert_batch(&mut self, records: &[Record]) -> Result<(), ReconError> {
        if self.constraints.is_empty() {
            return Err(ReconError::StorageFailure(
                "upsert needs a uniqueness constraint on the key column".into(),
            ));
        }
        if let Some(bad) = records.iter().find(|r| r.len() != self.schema.width()) {
            return Err(ReconError::StorageFailure(format!(
                "record has {} fields, table has {}",
                bad.len(),
                self.schema.width()
            )));
        }

        for record in records {
            let existing = self
                .by_key
                .get(self.schema.key_of(record))
                .and_then(|seqs| seqs.first().copied());
            match existing {
                Some(seq) => {
                    self.rows.insert(seq, record.clone());
                }
                None => {
                    self.insert(record.clone());
                }
            }
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), ReconError> {
        if self.pending.is_some() {
            return Err(ReconError::StorageFailure(
                "transaction already open".into(),
            ));
        }
        self.pending = Some(self.snapshot());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ReconError> {
        match self.pending.take() {
            Some(_) => Ok(()),
            None => Err(ReconError::StorageFailure("no open transaction".into())),
        }
    }

    fn rollback(&mut self) -> Result<(), ReconError> {
        let snapshot = self
            .pending
            .take()
            .ok_or_else(|| ReconError::StorageFailure("no open transaction".into()))?;
        *self = Self::restore(snapshot);
        Ok(())
    }
}
