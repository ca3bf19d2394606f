use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Ordered column names plus the position of the business key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSchema")]
pub struct Schema {
    columns: Vec<String>,
    key_index: usize,
}

#[derive(Deserialize)]
struct RawSchema {
    columns: Vec<String>,
    key_index: usize,
}

impl TryFrom<RawSchema> for Schema {
    type Error = ReconError;

    fn try_from(raw: RawSchema) -> Result<Self, ReconError> {
        let key = raw.columns.get(raw.key_index).cloned().ok_or_else(|| {
            ReconError::SchemaMismatch(format!(
                "key index {} out of range for {} columns",
                raw.key_index,
                raw.columns.len()
            ))
        })?;
        Schema::new(raw.columns, &key)
    }
}

impl Schema {
    pub fn new<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        key_column: &str,
    ) -> Result<Self, ReconError> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();

        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(ReconError::SchemaMismatch(format!(
                    "duplicate column '{name}'"
                )));
            }
        }

        let key_index = columns.iter().position(|c| c == key_column).ok_or_else(|| {
            ReconError::SchemaMismatch(format!("key column '{key_column}' not in schema"))
        })?;

        Ok(Self { columns, key_index })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn key_index(&self) -> usize {
        self.key_index
    }

    pub fn key_column(&self) -> &str {
        self.columns.get(self.key_index).map_or("", String::as_str)
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Business key of a record laid out in this schema.
    pub fn key_of<'r>(&self, record: &'r Record) -> &'r str {
        record.get(self.key_index).unwrap_or("")
    }

    /// Same column set, ignoring order.
    pub fn same_columns(&self, other: &Schema) -> bool {
        self.width() == other.width() && self.columns.iter().all(|c| other.position(c).is_some())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of text fields, in schema column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    values: Vec<String>,
}

impl Record {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }
}

impl<S: Into<String>> FromIterator<S> for Record {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// A record held by a base store, tagged with its insertion sequence number.
///
/// `seq` is assigned on insert, strictly increasing and never reused. Updates
/// keep the original `seq`, so the lowest `seq` among same-key records is the
/// first one inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub seq: u64,
    pub record: Record,
}

/// An ordered batch of records sharing one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRecordSet")]
pub struct RecordSet {
    schema: Schema,
    records: Vec<Record>,
}

#[derive(Deserialize)]
struct RawRecordSet {
    schema: Schema,
    records: Vec<Record>,
}

impl TryFrom<RawRecordSet> for RecordSet {
    type Error = ReconError;

    fn try_from(raw: RawRecordSet) -> Result<Self, ReconError> {
        RecordSet::with_records(raw.schema, raw.records)
    }
}

impl RecordSet {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }

    pub fn with_records(schema: Schema, records: Vec<Record>) -> Result<Self, ReconError> {
        let mut set = Self::new(schema);
        for record in records {
            set.push(record)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, record: Record) -> Result<(), ReconError> {
        if record.len() != self.schema.width() {
            return Err(ReconError::SchemaMismatch(format!(
                "record has {} fields, schema has {}",
                record.len(),
                self.schema.width()
            )));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Audit report + output
// ---------------------------------------------------------------------------

/// Per-run counters. Field order is the fixed emission order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub base_count_before: usize,
    pub incoming_count_total: usize,
    pub base_duplicates_removed: usize,
    pub incoming_unique_count: usize,
    pub inserted: usize,
    pub updated: usize,
    pub base_count_after: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub key_column: String,
    pub constraint_name: String,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub report: AuditReport,
}
