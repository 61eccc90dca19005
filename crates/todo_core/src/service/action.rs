//! Inbound call model.

use crate::model::principal::Principal;
use crate::model::todo::TodoId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// External action accepted by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionKind {
    Add,
    Edit,
    Toggle,
}

impl ActionKind {
    /// Parses short (`add`) and ledger (`addtodo`) action names.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "add" | "addtodo" => Some(Self::Add),
            "edit" | "edittodo" => Some(Self::Edit),
            "toggle" | "toggletodo" => Some(Self::Toggle),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Toggle => "toggle",
        }
    }

    /// Action name as registered on the ledger.
    pub fn ledger_name(self) -> &'static str {
        match self {
            Self::Add => "addtodo",
            Self::Edit => "edittodo",
            Self::Toggle => "toggletodo",
        }
    }

    /// Whether the action carries a text payload.
    pub fn takes_text(self) -> bool {
        !matches!(self, Self::Toggle)
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl Display for UnknownAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown action `{}`", self.0)
    }
}

impl Error for UnknownAction {}

impl TryFrom<String> for ActionKind {
    type Error = UnknownAction;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(UnknownAction(value))
    }
}

impl From<ActionKind> for String {
    fn from(value: ActionKind) -> Self {
        value.as_str().to_string()
    }
}

/// One validated call delivered by the ledger runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCall {
    pub action: ActionKind,
    pub id: TodoId,
    /// Required by `add` and `edit`; ignored by `toggle`.
    #[serde(default)]
    pub text: Option<String>,
    /// Authenticated caller.
    pub caller: Principal,
    /// Base version the caller observed. Absent means "current".
    #[serde(default)]
    pub expected_version: Option<u64>,
    /// Replay key, typically the ledger transaction id.
    #[serde(default)]
    pub call_id: Option<String>,
}

impl ActionCall {
    pub fn add(id: TodoId, text: impl Into<String>, caller: Principal) -> Self {
        Self::new(ActionKind::Add, id, Some(text.into()), caller)
    }

    pub fn edit(id: TodoId, text: impl Into<String>, caller: Principal) -> Self {
        Self::new(ActionKind::Edit, id, Some(text.into()), caller)
    }

    pub fn toggle(id: TodoId, caller: Principal) -> Self {
        Self::new(ActionKind::Toggle, id, None, caller)
    }

    fn new(action: ActionKind, id: TodoId, text: Option<String>, caller: Principal) -> Self {
        Self {
            action,
            id,
            text,
            caller,
            expected_version: None,
            call_id: None,
        }
    }

    pub fn with_expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionCall, ActionKind};

    #[test]
    fn parses_short_and_ledger_names() {
        assert_eq!(ActionKind::parse("add"), Some(ActionKind::Add));
        assert_eq!(ActionKind::parse("edittodo"), Some(ActionKind::Edit));
        assert_eq!(ActionKind::parse(" toggletodo "), Some(ActionKind::Toggle));
        assert_eq!(ActionKind::parse("removetodo"), None);
        assert_eq!(ActionKind::Edit.ledger_name(), "edittodo");
    }

    #[test]
    fn deserializes_inbound_call_shape() {
        let call: ActionCall = serde_json::from_str(
            r#"{"action":"toggletodo","id":18446744073709551615,"caller":"alice"}"#,
        )
        .expect("call should deserialize");
        assert_eq!(call.action, ActionKind::Toggle);
        assert_eq!(call.id, u64::MAX);
        assert_eq!(call.text, None);
        assert_eq!(call.expected_version, None);

        let err = serde_json::from_str::<ActionCall>(r#"{"action":"burn","id":1,"caller":"alice"}"#)
            .expect_err("unknown action must fail");
        assert!(err.to_string().contains("burn"));
    }
}
