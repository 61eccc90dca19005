//! Action dispatch: the entry point for validated ledger calls.
//!
//! # Responsibility
//! - Map inbound calls onto guard checks and record store operations.
//! - Keep each call a single atomic commit or a clean failure.

pub mod action;
pub mod dispatcher;
