use std::borrow::Cow;

use crate::config::{ReconConfig, SchemaPolicy};
use crate::constraint::enforce_unique_key;
use crate::dedup::{dedup_base, dedup_incoming};
use crate::error::ReconError;
use crate::merge::execute_merge;
use crate::model::{AuditReport, Record, RecordSet, ReconMeta, ReconResult, Schema};
use crate::store::BaseStore;

/// Run reconciliation per config. Returns the audit report plus run metadata.
pub fn run<S: BaseStore + ?Sized>(
    config: &ReconConfig,
    base: &mut S,
    incoming: &RecordSet,
) -> Result<ReconResult, ReconError> {
    Reconciler::new(config.clone())?.run(base, incoming)
}

/// Run reconciliation per config and return only the audit report.
pub fn reconcile<S: BaseStore + ?Sized>(
    config: &ReconConfig,
    base: &mut S,
    incoming: &RecordSet,
) -> Result<AuditReport, ReconError> {
    run(config, base, incoming).map(|result| result.report)
}

/// Folds incoming batches into a base store, one run at a time.
///
/// Every run executes base dedup, key constraint, incoming dedup and merge
/// inside a single store transaction. A failed run is rolled back and yields
/// no report. Runs are idempotent for a fixed incoming batch.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconConfig,
}

impl Reconciler {
    pub fn new(config: ReconConfig) -> Result<Self, ReconError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn reconcile<S: BaseStore + ?Sized>(
        &self,
        base: &mut S,
        incoming: &RecordSet,
    ) -> Result<AuditReport, ReconError> {
        self.run(base, incoming).map(|result| result.report)
    }

    pub fn run<S: BaseStore + ?Sized>(
        &self,
        base: &mut S,
        incoming: &RecordSet,
    ) -> Result<ReconResult, ReconError> {
        let name = &self.config.name;

        // Schema checks happen before the transaction opens
        let schema = base.schema()?;
        let records = self.conform_incoming(&schema, incoming)?;

        log::info!(
            "reconcile '{name}': {} incoming rows keyed on '{}'",
            incoming.len(),
            schema.key_column()
        );

        base.begin()?;

        let report = match self.run_stages(base, &schema, &records) {
            Ok(report) => report,
            Err(err) => return Err(self.abort(base, err)),
        };

        if let Err(err) = base.commit() {
            return Err(self.abort(base, err));
        }

        log::info!("reconcile '{name}': {report}");

        Ok(ReconResult {
            meta: ReconMeta {
                config_name: self.config.name.clone(),
                key_column: schema.key_column().to_string(),
                constraint_name: self.config.constraint_name.clone(),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
            },
            report,
        })
    }

    fn run_stages<S: BaseStore + ?Sized>(
        &self,
        base: &mut S,
        schema: &Schema,
        incoming: &[Record],
    ) -> Result<AuditReport, ReconError> {
        let base_count_before = base.count()?;

        let base_duplicates_removed = dedup_base(base)?;

        enforce_unique_key(base, &self.config.constraint_name)?;

        let unique = dedup_incoming(schema, incoming);
        log::debug!(
            "incoming dedup: {} rows -> {} unique keys",
            incoming.len(),
            unique.len()
        );

        let split = execute_merge(base, schema, &unique)?;

        let report = AuditReport {
            base_count_before,
            incoming_count_total: incoming.len(),
            base_duplicates_removed,
            incoming_unique_count: unique.len(),
            inserted: split.inserted,
            updated: split.updated,
            base_count_after: base.count()?,
        };
        report.check()?;
        Ok(report)
    }

    /// Validate the incoming schema against the base and lay incoming records
    /// out in base column order.
    fn conform_incoming<'a>(
        &self,
        schema: &Schema,
        incoming: &'a RecordSet,
    ) -> Result<Cow<'a, [Record]>, ReconError> {
        if schema.key_column() != self.config.key_column {
            return Err(ReconError::SchemaMismatch(format!(
                "base is keyed on '{}', config expects '{}'",
                schema.key_column(),
                self.config.key_column
            )));
        }

        let theirs = incoming.schema();
        if theirs.key_column() != schema.key_column() {
            return Err(ReconError::SchemaMismatch(format!(
                "incoming is keyed on '{}', base on '{}'",
                theirs.key_column(),
                schema.key_column()
            )));
        }

        if theirs.columns() == schema.columns() {
            return Ok(Cow::Borrowed(incoming.records()));
        }

        match self.config.schema_policy {
            SchemaPolicy::SameColumns if schema.same_columns(theirs) => {
                let order: Vec<usize> = schema
                    .columns()
                    .iter()
                    .filter_map(|c| theirs.position(c))
                    .collect();
                let projected: Vec<Record> = incoming
                    .records()
                    .iter()
                    .map(|r| order.iter().map(|&i| r.get(i).unwrap_or("")).collect::<Record>())
                    .collect();
                Ok(Cow::Owned(projected))
            }
            policy => Err(ReconError::SchemaMismatch(format!(
                "incoming columns [{}] do not match base columns [{}] (policy: {policy})",
                theirs.columns().join(", "),
                schema.columns().join(", ")
            ))),
        }
    }

    fn abort<S: BaseStore + ?Sized>(&self, base: &mut S, err: ReconError) -> ReconError {
        log::error!("reconcile '{}' failed, rolling back: {err}", self.config.name);
        if let Err(rollback_err) = base.rollback() {
            log::error!(
                "reconcile '{}': rollback failed: {rollback_err}",
                self.config.name
            );
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBase;

    fn schema() -> Schema {
        Schema::new(["k", "v"], "k").unwrap()
    }

    fn rec(k: &str, v: &str) -> Record {
        [k, v].into_iter().collect()
    }

    fn set(rows: &[(&str, &str)]) -> RecordSet {
        RecordSet::with_records(schema(), rows.iter().map(|(k, v)| rec(k, v)).collect()).unwrap()
    }

    fn config() -> ReconConfig {
        ReconConfig::new("test", "k")
    }

    #[test]
    fn merge_scenario() {
        let mut base = MemoryBase::from_record_set(set(&[("K1", "old")]));
        let incoming = set(&[("K1", "new"), ("K2", "x")]);

        let report = reconcile(&config(), &mut base, &incoming).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.base_count_after, 2);
        assert_eq!(base.records(), vec![rec("K1", "new"), rec("K2", "x")]);
        assert!(!base.in_transaction());
    }

    #[test]
    fn second_run_is_all_updates() {
        let mut base = MemoryBase::from_record_set(set(&[("K1", "a"), ("K1", "b"), ("K3", "c")]));
        let incoming = set(&[("K2", "x"), ("K3", "y"), ("K2", "z")]);

        let first = reconcile(&config(), &mut base, &incoming).unwrap();
        let after_first = base.records();
        let second = reconcile(&config(), &mut base, &incoming).unwrap();

        assert_eq!(first.base_duplicates_removed, 1);
        assert_eq!(first.inserted, 1);
        assert_eq!(first.updated, 1);
        assert_eq!(second.base_duplicates_removed, 0);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, second.incoming_unique_count);
        assert_eq!(base.records(), after_first);
    }

    #[test]
    fn report_meta_names_the_run() {
        let mut base = MemoryBase::from_record_set(set(&[]));
        let config = config().with_constraint_name("uq_k");
        let result = run(&config, &mut base, &set(&[("K1", "a")])).unwrap();
        assert_eq!(result.meta.config_name, "test");
        assert_eq!(result.meta.key_column, "k");
        assert_eq!(result.meta.constraint_name, "uq_k");
        assert!(!result.meta.run_at.is_empty());
        assert!(base.has_constraint("uq_k").unwrap());
    }

    #[test]
    fn schema_mismatch_aborts_before_mutation() {
        let mut base = MemoryBase::from_record_set(set(&[("K1", "a"), ("K1", "b")]));
        let other = Schema::new(["k", "other"], "k").unwrap();
        let incoming = RecordSet::with_records(other, vec![rec("K2", "x")]).unwrap();

        let err = reconcile(&config(), &mut base, &incoming).unwrap_err();
        assert!(matches!(err, ReconError::SchemaMismatch(_)));
        // duplicate survived: base dedup never ran
        assert_eq!(base.count().unwrap(), 2);
        assert!(!base.in_transaction());
    }

    #[test]
    fn config_key_must_match_base() {
        let mut base = MemoryBase::from_record_set(set(&[]));
        let err = reconcile(&ReconConfig::new("t", "v"), &mut base, &set(&[])).unwrap_err();
        assert!(err.to_string().contains("config expects 'v'"));
    }

    #[test]
    fn same_columns_policy_reorders_incoming() {
        let mut base = MemoryBase::from_record_set(set(&[("K1", "old")]));
        let flipped = Schema::new(["v", "k"], "k").unwrap();
        let incoming = RecordSet::with_records(
            flipped,
            vec![["new", "K1"].into_iter().collect(), ["x", "K2"].into_iter().collect()],
        )
        .unwrap();

        let exact = reconcile(&config(), &mut base, &incoming);
        assert!(matches!(exact, Err(ReconError::SchemaMismatch(_))));

        let config = config().with_schema_policy(SchemaPolicy::SameColumns);
        let report = reconcile(&config, &mut base, &incoming).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(base.records(), vec![rec("K1", "new"), rec("K2", "x")]);
    }

    #[test]
    fn empty_incoming_still_dedups_base() {
        let mut base = MemoryBase::from_record_set(set(&[("K1", "a"), ("K1", "b")]));
        let report = reconcile(&config(), &mut base, &set(&[])).unwrap();
        assert_eq!(report.base_duplicates_removed, 1);
        assert_eq!(report.incoming_unique_count, 0);
        assert_eq!(report.base_count_after, 1);
    }

    #[test]
    fn invalid_config_rejected() {
        let err =
            Reconciler::new(ReconConfig::new("t", "k").with_constraint_name("1bad")).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }
}
