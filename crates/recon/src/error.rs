use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (empty key column, bad constraint name, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Base and incoming field sets cannot be merged, or the key column is missing.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    /// Base still holds duplicate keys when the uniqueness constraint is added.
    #[error("constraint '{constraint}' violated: key '{key}' appears {count} times")]
    ConstraintViolation {
        constraint: String,
        key: String,
        count: usize,
    },
    /// The backing store failed; the run is rolled back.
    #[error("storage failure: {0}")]
    StorageFailure(String),
    /// The computed report breaks its count invariants.
    #[error("audit mismatch: {0}")]
    AuditMismatch(String),
}

impl ReconError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::StorageFailure(err.to_string())
    }
}
