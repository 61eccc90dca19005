//! Ledger action feed ingestion.
//!
//! # Responsibility
//! - Turn a stream of raw ledger actions into dispatcher calls.
//! - Filter to the configured contract account and known actions.

pub mod ingest;
