use serde::Deserialize;

use crate::error::ReconError;

pub const DEFAULT_CONSTRAINT_NAME: &str = "keymerge_business_key_uq";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    pub key_column: String,
    #[serde(default = "default_constraint_name")]
    pub constraint_name: String,
    #[serde(default)]
    pub schema_policy: SchemaPolicy,
}

fn default_constraint_name() -> String {
    DEFAULT_CONSTRAINT_NAME.to_string()
}

// ---------------------------------------------------------------------------
// Schema policy
// ---------------------------------------------------------------------------

/// How strictly the incoming schema must match the base schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPolicy {
    /// Same column names in the same order.
    #[default]
    Exact,
    /// Same column names in any order; incoming rows are reordered to base order.
    SameColumns,
}

impl std::fmt::Display for SchemaPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::SameColumns => write!(f, "same_columns"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn new(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: key_column.into(),
            constraint_name: default_constraint_name(),
            schema_policy: SchemaPolicy::default(),
        }
    }

    pub fn with_constraint_name(mut self, name: impl Into<String>) -> Self {
        self.constraint_name = name.into();
        self
    }

    pub fn with_schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.schema_policy = policy;
        self
    }

    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.name.trim().is_empty() {
            return Err(ReconError::ConfigValidation("name must not be empty".into()));
        }

        if self.key_column.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "key_column must not be empty".into(),
            ));
        }

        // Used verbatim as an index name by SQL-backed stores
        if !is_identifier(&self.constraint_name) {
            return Err(ReconError::ConfigValidation(format!(
                "constraint_name '{}' is not a plain identifier",
                self.constraint_name
            )));
        }

        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
