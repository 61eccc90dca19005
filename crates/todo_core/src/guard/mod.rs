//! Call admission guards applied before any record mutation.
//!
//! # Responsibility
//! - `auth`: ownership check of the caller against the stored record.
//! - `replay`: per-id mutual exclusion for in-flight mutations.

pub mod auth;
pub mod replay;
