//! Validated caller identity supplied by the ledger runtime.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Ledger account names: 1-12 chars drawn from `a-z`, `1-5` and `.`.
static ACCOUNT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z1-5.]{1,12}$").expect("valid account name regex"));

/// Authenticated account identity of a caller or record owner.
///
/// Authentication happens outside the core; this type only guarantees the
/// value is a well-formed account name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Parses one account name, trimming surrounding whitespace.
    pub fn parse(value: &str) -> Result<Self, PrincipalError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(PrincipalError::Empty);
        }
        if !ACCOUNT_NAME_RE.is_match(trimmed) {
            return Err(PrincipalError::Malformed(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Principal {
    type Error = PrincipalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

/// Principal parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalError {
    Empty,
    Malformed(String),
}

impl Display for PrincipalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "principal must not be empty"),
            Self::Malformed(value) => write!(
                f,
                "principal `{value}` is not a valid account name (1-12 chars of a-z, 1-5, .)"
            ),
        }
    }
}

impl Error for PrincipalError {}
