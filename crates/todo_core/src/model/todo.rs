//! To-do record domain model.
//!
//! # Responsibility
//! - Define the canonical record persisted by the record store.
//! - Define the closed set of mutations a record accepts.
//!
//! # Invariants
//! - `version` starts at `INITIAL_VERSION` and only moves forward.
//! - Mutations never touch `id` or `owner`.

use crate::model::principal::Principal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller-assigned record identifier.
pub type TodoId = u64;

/// Version assigned to a freshly created record.
pub const INITIAL_VERSION: u64 = 1;

/// Canonical to-do record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoRecord {
    /// Unique, immutable identifier assigned by the caller.
    pub id: TodoId,
    /// Account that created the record. Never changes.
    pub owner: Principal,
    /// Free-form UTF-8 payload, replaced by `edit`.
    pub text: String,
    /// Completion flag, flipped by `toggle`.
    pub done: bool,
    /// Bumped on every accepted mutation.
    pub version: u64,
}

impl TodoRecord {
    /// Builds the initial state of a record about to be created.
    pub fn new(id: TodoId, owner: Principal, text: impl Into<String>) -> Self {
        Self {
            id,
            owner,
            text: text.into(),
            done: false,
            version: INITIAL_VERSION,
        }
    }

    /// Validates record state before persistence and after reads.
    pub fn validate(&self) -> Result<(), TodoValidationError> {
        if self.version < INITIAL_VERSION {
            return Err(TodoValidationError::InvalidVersion(self.version));
        }
        Ok(())
    }

    /// Applies `mutation` and bumps the version.
    ///
    /// Returns an error instead of wrapping when the version space is spent.
    pub fn apply(&mut self, mutation: &TodoMutation) -> Result<(), TodoValidationError> {
        let next_version = self
            .version
            .checked_add(1)
            .ok_or(TodoValidationError::VersionExhausted(self.id))?;
        match mutation {
            TodoMutation::SetText(text) => self.text = text.clone(),
            TodoMutation::ToggleDone => self.done = !self.done,
        }
        self.version = next_version;
        Ok(())
    }
}

/// Closed set of state transitions accepted by an existing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoMutation {
    /// Replace the record text.
    SetText(String),
    /// Flip the completion flag.
    ToggleDone,
}

/// Record-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoValidationError {
    InvalidVersion(u64),
    VersionExhausted(TodoId),
}

impl Display for TodoValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidVersion(version) => {
                write!(f, "record version must be >= {INITIAL_VERSION}, got {version}")
            }
            Self::VersionExhausted(id) => write!(f, "record {id} cannot accept more mutations"),
        }
    }
}

impl Error for TodoValidationError {}

#[cfg(test)]
mod tests {
    use super::{TodoMutation, TodoRecord, TodoValidationError, INITIAL_VERSION};
    use crate::model::principal::Principal;

    fn owner() -> Principal {
        Principal::parse("alice").expect("alice should parse")
    }

    #[test]
    fn new_record_starts_open_at_initial_version() {
        let record = TodoRecord::new(7, owner(), "buy milk");
        assert!(!record.done);
        assert_eq!(record.version, INITIAL_VERSION);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn apply_changes_only_the_targeted_field() {
        let mut record = TodoRecord::new(7, owner(), "buy milk");
        record
            .apply(&TodoMutation::SetText("buy eggs".to_string()))
            .expect("edit applies");
        assert_eq!(record.text, "buy eggs");
        assert!(!record.done);
        assert_eq!(record.version, 2);

        record.apply(&TodoMutation::ToggleDone).expect("toggle applies");
        assert!(record.done);
        assert_eq!(record.text, "buy eggs");
        assert_eq!(record.version, 3);
        assert_eq!(record.owner, owner());
    }

    #[test]
    fn apply_refuses_to_wrap_version() {
        let mut record = TodoRecord::new(7, owner(), "x");
        record.version = u64::MAX;
        let err = record
            .apply(&TodoMutation::ToggleDone)
            .expect_err("exhausted version must fail");
        assert_eq!(err, TodoValidationError::VersionExhausted(7));
        assert!(!record.done);
    }

    #[test]
    fn validate_rejects_zero_version() {
        let mut record = TodoRecord::new(1, owner(), "x");
        record.version = 0;
        assert_eq!(
            record.validate(),
            Err(TodoValidationError::InvalidVersion(0))
        );
    }
}
