//! Ownership authorization for record mutations.

use crate::model::principal::Principal;
use crate::model::todo::{TodoId, TodoRecord};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Authorization failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Caller is not the record owner.
    NotOwner { id: TodoId, caller: Principal },
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwner { id, caller } => {
                write!(f, "caller `{caller}` does not own todo {id}")
            }
        }
    }
}

impl Error for AuthError {}

/// Succeeds iff `caller` owns `record`. Pure; never touches storage.
pub fn authorize(record: &TodoRecord, caller: &Principal) -> Result<(), AuthError> {
    if record.owner == *caller {
        return Ok(());
    }
    Err(AuthError::NotOwner {
        id: record.id,
        caller: caller.clone(),
    })
}
