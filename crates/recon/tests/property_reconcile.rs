// Property-based tests for the reconcile pipeline.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::HashSet;

use keymerge_recon::model::{Record, RecordSet, Schema};
use keymerge_recon::store::{BaseStore, MemoryBase};
use keymerge_recon::{reconcile, ReconConfig};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn schema() -> Schema {
    Schema::new(["key", "amount", "label"], "key").unwrap()
}

fn recon_config() -> ReconConfig {
    ReconConfig::new("prop", "key")
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Small key space so duplicates and overlaps are common.
fn arb_key() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => r"K[0-9]{1}",
        1 => r"[A-Za-z0-9]{1,6}",
        1 => Just("".to_string()),
    ]
}

fn arb_record() -> impl Strategy<Value = Record> {
    (arb_key(), r"-?[0-9]{1,4}", r"[a-z ]{0,6}")
        .prop_map(|(k, a, l)| [k, a, l].into_iter().collect::<Record>())
}

fn arb_records(max: usize) -> impl Strategy<Value = Vec<Record>> {
    proptest::collection::vec(arb_record(), 0..=max)
}

fn set(records: Vec<Record>) -> RecordSet {
    RecordSet::with_records(schema(), records).unwrap()
}

fn distinct_keys(records: &[Record]) -> usize {
    records
        .iter()
        .map(|r| r.values()[0].clone())
        .collect::<HashSet<_>>()
        .len()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn second_run_changes_nothing(base_rows in arb_records(20), incoming_rows in arb_records(20)) {
        let mut base = MemoryBase::from_record_set(set(base_rows));
        let incoming = set(incoming_rows);

        reconcile(&recon_config(), &mut base, &incoming).unwrap();
        let after_first = base.records();
        let second = reconcile(&recon_config(), &mut base, &incoming).unwrap();

        prop_assert_eq!(base.records(), after_first);
        prop_assert_eq!(second.inserted, 0);
        prop_assert_eq!(second.base_duplicates_removed, 0);
        prop_assert_eq!(second.updated, second.incoming_unique_count);
    }

    #[test]
    fn counts_balance(base_rows in arb_records(20), incoming_rows in arb_records(20)) {
        let base_distinct = distinct_keys(&base_rows);
        let incoming_distinct = distinct_keys(&incoming_rows);
        let mut base = MemoryBase::from_record_set(set(base_rows.clone()));

        let r = reconcile(&recon_config(), &mut base, &set(incoming_rows.clone())).unwrap();

        prop_assert_eq!(r.base_count_before, base_rows.len());
        prop_assert_eq!(r.incoming_count_total, incoming_rows.len());
        prop_assert_eq!(r.base_duplicates_removed, base_rows.len() - base_distinct);
        prop_assert_eq!(r.incoming_unique_count, incoming_distinct);
        prop_assert_eq!(r.inserted + r.updated, r.incoming_unique_count);
        prop_assert_eq!(
            r.base_count_after,
            r.base_count_before - r.base_duplicates_removed + r.inserted
        );
        prop_assert_eq!(base.count().unwrap(), r.base_count_after);
    }

    #[test]
    fn base_keys_unique_after_run(base_rows in arb_records(20), incoming_rows in arb_records(20)) {
        let mut base = MemoryBase::from_record_set(set(base_rows));
        reconcile(&recon_config(), &mut base, &set(incoming_rows)).unwrap();

        let records = base.records();
        prop_assert_eq!(distinct_keys(&records), records.len());
    }

    #[test]
    fn incoming_set_is_untouched(incoming_rows in arb_records(20)) {
        let incoming = set(incoming_rows.clone());
        let mut base = MemoryBase::from_record_set(set(vec![]));
        reconcile(&recon_config(), &mut base, &incoming).unwrap();
        prop_assert_eq!(incoming.records(), incoming_rows.as_slice());
    }

    #[test]
    fn every_incoming_key_lands_with_first_seen_payload(
        base_rows in arb_records(10),
        incoming_rows in arb_records(20)
    ) {
        let mut base = MemoryBase::from_record_set(set(base_rows));
        reconcile(&recon_config(), &mut base, &set(incoming_rows.clone())).unwrap();

        let records = base.records();
        for key in incoming_rows.iter().map(|r| &r.values()[0]) {
            let first_seen = incoming_rows.iter().find(|r| &r.values()[0] == key).unwrap();
            let stored = records.iter().find(|r| &r.values()[0] == key).unwrap();
            prop_assert_eq!(stored, first_seen);
        }
    }
}
