//! The append-only ingestion ledger: runs, checkpoints, raw arrivals.

pub mod activities;
pub mod models;

pub use activities::{ingest_item, record_arrival, ArrivalReceipt};
pub use models::{IngestRun, RawArrival, RunStatus, SourceCheckpoint};
