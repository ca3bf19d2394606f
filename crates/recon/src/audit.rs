use std::fmt;

use crate::error::ReconError;
use crate::model::AuditReport;

impl AuditReport {
    /// Counters as `(name, value)` pairs in the fixed emission order.
    pub fn entries(&self) -> [(&'static str, usize); 7] {
        [
            ("base_count_before", self.base_count_before),
            ("incoming_count_total", self.incoming_count_total),
            ("base_duplicates_removed", self.base_duplicates_removed),
            ("incoming_unique_count", self.incoming_unique_count),
            ("inserted", self.inserted),
            ("updated", self.updated),
            ("base_count_after", self.base_count_after),
        ]
    }

    /// Check the count invariants:
    /// `after = before - duplicates_removed + inserted` and
    /// `inserted + updated = incoming_unique_count`.
    pub fn check(&self) -> Result<(), ReconError> {
        if self.inserted + self.updated != self.incoming_unique_count {
            return Err(ReconError::AuditMismatch(format!(
                "inserted ({}) + updated ({}) != incoming unique ({})",
                self.inserted, self.updated, self.incoming_unique_count
            )));
        }

        if self.incoming_unique_count > self.incoming_count_total {
            return Err(ReconError::AuditMismatch(format!(
                "incoming unique ({}) exceeds incoming total ({})",
                self.incoming_unique_count, self.incoming_count_total
            )));
        }

        let expected = self
            .base_count_before
            .checked_sub(self.base_duplicates_removed)
            .map(|n| n + self.inserted);
        if expected != Some(self.base_count_after) {
            return Err(ReconError::AuditMismatch(format!(
                "base after ({}) != before ({}) - duplicates removed ({}) + inserted ({})",
                self.base_count_after,
                self.base_count_before,
                self.base_duplicates_removed,
                self.inserted
            )));
        }

        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries()
                .into_iter()
                .map(|(name, value)| (name.to_string(), serde_json::Value::from(value)))
                .collect(),
        )
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}
