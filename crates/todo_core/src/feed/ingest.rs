//! JSON-lines feed reader and replay loop.
//!
//! # Invariants
//! - Actions are dispatched in feed order.
//! - Each action's replay key is `{trx_id}:{index}`, where `index` counts
//!   earlier actions of the same transaction, so re-ingesting a feed is a
//!   no-op for actions that already committed.
//! - Payloads are only decoded for subscribed actions; other contracts'
//!   actions are skipped whatever their data looks like.
//! - A per-action failure (including an undecodable subscribed payload) is
//!   recorded and ingestion continues; a line that is not a feed action
//!   envelope aborts ingestion. Earlier lines stay committed either way.

use crate::model::principal::Principal;
use crate::model::todo::TodoId;
use crate::repo::todo_repo::TodoRepository;
use crate::service::action::{ActionCall, ActionKind};
use crate::service::dispatcher::{ActionDispatcher, DispatchOutcome, ErrorKind};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::BufRead;
use std::time::Instant;

/// One raw action as emitted by the ledger.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedAction {
    pub block_num: u64,
    pub trx_id: String,
    pub account: String,
    pub name: String,
    #[serde(default)]
    pub authorization: Vec<FeedAuthorization>,
    /// Raw payload; its shape depends on `account` and `name`.
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedAuthorization {
    pub actor: String,
    #[serde(default)]
    pub permission: Option<String>,
}

/// Payload of a subscribed to-do action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedActionData {
    pub id: TodoId,
    #[serde(default)]
    pub text: Option<String>,
}

/// Per-action failure recorded during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    /// 1-based feed line.
    pub line: usize,
    pub block_num: u64,
    pub trx_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub applied: usize,
    pub replayed: usize,
    /// Actions for other accounts or unknown action names.
    pub skipped: usize,
    pub failures: Vec<IngestFailure>,
}

#[derive(Debug)]
pub enum FeedError {
    Io(std::io::Error),
    Malformed {
        line: usize,
        source: serde_json::Error,
    },
}

impl Display for FeedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read feed: {err}"),
            Self::Malformed { line, source } => {
                write!(f, "malformed feed action on line {line}: {source}")
            }
        }
    }
}

impl Error for FeedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Malformed { source, .. } => Some(source),
        }
    }
}

impl From<std::io::Error> for FeedError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Reads `reader` line by line and dispatches every subscribed action.
pub fn ingest_feed<R: TodoRepository>(
    dispatcher: &ActionDispatcher<R>,
    reader: impl BufRead,
) -> Result<IngestReport, FeedError> {
    let started_at = Instant::now();
    let contract_account = dispatcher.config().contract_account.as_str();
    let mut report = IngestReport::default();
    let mut trx_positions: HashMap<String, usize> = HashMap::new();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let action: FeedAction =
            serde_json::from_str(&line).map_err(|source| FeedError::Malformed {
                line: line_no,
                source,
            })?;
        let position = trx_positions.entry(action.trx_id.clone()).or_insert(0);
        let call_id = format!("{}:{}", action.trx_id, *position);
        *position += 1;

        let Some(kind) = subscribed_kind(&action, contract_account) else {
            report.skipped += 1;
            continue;
        };

        let call = match to_call(&action, kind, call_id) {
            Ok(call) => call,
            Err(message) => {
                report.failures.push(failure(line_no, &action, ErrorKind::InvalidCall, message));
                continue;
            }
        };

        match dispatcher.dispatch(&call) {
            Ok(DispatchOutcome::Committed(_)) => report.applied += 1,
            Ok(DispatchOutcome::Replayed(_)) => report.replayed += 1,
            Err(err) => {
                report
                    .failures
                    .push(failure(line_no, &action, err.kind(), err.to_string()));
            }
        }
    }

    if report.failures.is_empty() {
        info!(
            "event=feed_ingest module=feed status=ok applied={} replayed={} skipped={} duration_ms={}",
            report.applied,
            report.replayed,
            report.skipped,
            started_at.elapsed().as_millis()
        );
    } else {
        warn!(
            "event=feed_ingest module=feed status=partial applied={} replayed={} skipped={} failed={} duration_ms={}",
            report.applied,
            report.replayed,
            report.skipped,
            report.failures.len(),
            started_at.elapsed().as_millis()
        );
    }

    Ok(report)
}

fn subscribed_kind(action: &FeedAction, contract_account: &str) -> Option<ActionKind> {
    if action.account != contract_account {
        return None;
    }
    ActionKind::parse(&action.name)
}

fn to_call(action: &FeedAction, kind: ActionKind, call_id: String) -> Result<ActionCall, String> {
    let actor = action
        .authorization
        .first()
        .map(|auth| auth.actor.as_str())
        .ok_or_else(|| "action has no authorization".to_string())?;
    let caller = Principal::parse(actor).map_err(|err| err.to_string())?;
    let data = FeedActionData::deserialize(&action.data)
        .map_err(|err| format!("undecodable `{}` payload: {err}", action.name))?;

    Ok(ActionCall {
        action: kind,
        id: data.id,
        text: data.text,
        caller,
        expected_version: None,
        call_id: Some(call_id),
    })
}

fn failure(line: usize, action: &FeedAction, kind: ErrorKind, message: String) -> IngestFailure {
    IngestFailure {
        line,
        block_num: action.block_num,
        trx_id: action.trx_id.clone(),
        kind,
        message,
    }
}
