//! Record store: persistence contracts and the SQLite implementation.
//!
//! # Responsibility
//! - Own every read and write of the contract table.
//! - Keep SQL details out of dispatch logic.
//!
//! # Invariants
//! - Every successful write is committed before the call returns.
//! - Updates are compare-and-set on `version`; a stale base never commits.
//! - Each committed action appends exactly one journal row in the same
//!   transaction as the record change.

pub mod todo_repo;
