//! Domain model for ledger-scoped to-do records.
//!
//! # Responsibility
//! - Define the canonical record shape shared by storage and dispatch.
//! - Define validated caller identities (`Principal`).
//!
//! # Invariants
//! - Every record is identified by a caller-assigned `TodoId`.
//! - `owner` and `id` never change after creation.

pub mod principal;
pub mod todo;
