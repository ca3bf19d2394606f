//! `keymerge-recon` — Idempotent keyed upsert of an incoming batch into a base
//! record set.
//!
//! Pure engine crate: receives a base store and a pre-loaded incoming batch,
//! returns an audit report. No CLI or file IO.

pub mod audit;
pub mod config;
pub mod constraint;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod merge;
pub mod model;
pub mod store;

pub use config::{ReconConfig, SchemaPolicy};
pub use engine::{reconcile, run, Reconciler};
pub use error::ReconError;
pub use model::{AuditReport, Record, RecordSet, ReconResult, Schema, StoredRecord};
pub use store::{BaseStore, MemoryBase};
