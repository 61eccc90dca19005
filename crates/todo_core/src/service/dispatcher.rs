//! Action dispatcher.
//!
//! # Responsibility
//! - Validate call shape, claim the record id, check ownership, then hand
//!   the mutation to the record store.
//! - Translate layer errors into the stable error kinds reported to the
//!   ledger runtime.
//!
//! # Invariants
//! - Every failure is detected before the store commits; no failure path
//!   leaves partial state.
//! - The in-flight permit is held from the replay lookup until commit, so
//!   the read-check-write sequence for one id is never interleaved.
//! - A call whose `call_id` already committed is answered from the journal
//!   and never re-applied, but only for the same record, caller and action.
//!   A non-owner replaying an owner's call id still fails `NotOwner`.

use crate::config::EngineConfig;
use crate::guard::auth::{authorize, AuthError};
use crate::guard::replay::{ReplayError, ReplayGuard};
use crate::model::principal::Principal;
use crate::model::todo::{TodoId, TodoMutation, TodoRecord};
use crate::repo::todo_repo::{
    CommitContext, JournalAction, JournalEntry, RepoError, RepoResult, TodoListQuery,
    TodoRepository,
};
use crate::service::action::{ActionCall, ActionKind};
use log::{info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Stable failure classification for the runtime's error channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateId,
    NotFound,
    NotOwner,
    VersionConflict,
    Busy,
    InvalidCall,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateId => "duplicate_id",
            Self::NotFound => "not_found",
            Self::NotOwner => "not_owner",
            Self::VersionConflict => "version_conflict",
            Self::Busy => "busy",
            Self::InvalidCall => "invalid_call",
            Self::Storage => "storage",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one dispatched call.
#[derive(Debug)]
pub enum DispatchError {
    DuplicateId(TodoId),
    NotFound(TodoId),
    NotOwner {
        id: TodoId,
        caller: Principal,
    },
    VersionConflict {
        id: TodoId,
        expected: u64,
        actual: u64,
    },
    Busy(TodoId),
    /// Call payload is unusable (missing or oversized text, reused call id).
    InvalidCall(String),
    /// Storage-level failure.
    Repo(RepoError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateId(_) => ErrorKind::DuplicateId,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotOwner { .. } => ErrorKind::NotOwner,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::Busy(_) => ErrorKind::Busy,
            Self::InvalidCall(_) => ErrorKind::InvalidCall,
            Self::Repo(_) => ErrorKind::Storage,
        }
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "todo already exists: {id}"),
            Self::NotFound(id) => write!(f, "todo not found: {id}"),
            Self::NotOwner { id, caller } => {
                write!(f, "caller `{caller}` does not own todo {id}")
            }
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on todo {id}: expected {expected}, stored {actual}"
            ),
            Self::Busy(id) => write!(f, "todo {id} has a mutation in flight"),
            Self::InvalidCall(message) => write!(f, "invalid call: {message}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for DispatchError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::DuplicateId(id) => Self::DuplicateId(id),
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::VersionConflict {
                id,
                expected,
                actual,
            } => Self::VersionConflict {
                id,
                expected,
                actual,
            },
            RepoError::CallAlreadyApplied(call_id) => {
                Self::InvalidCall(format!("call id `{call_id}` was already applied"))
            }
            other => Self::Repo(other),
        }
    }
}

impl From<AuthError> for DispatchError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::NotOwner { id, caller } => Self::NotOwner { id, caller },
        }
    }
}

impl From<ReplayError> for DispatchError {
    fn from(value: ReplayError) -> Self {
        match value {
            ReplayError::Busy(id) => Self::Busy(id),
        }
    }
}

/// Successful dispatch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The call committed a new record state.
    Committed(TodoRecord),
    /// The call id had already committed; this is the state it produced.
    Replayed(TodoRecord),
}

impl DispatchOutcome {
    pub fn record(&self) -> &TodoRecord {
        match self {
            Self::Committed(record) | Self::Replayed(record) => record,
        }
    }

    pub fn into_record(self) -> TodoRecord {
        match self {
            Self::Committed(record) | Self::Replayed(record) => record,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Dispatcher over one store connection.
///
/// Dispatchers on separate connections to the same database must share one
/// `ReplayGuard` for same-id calls to be linearized in-process.
pub struct ActionDispatcher<R: TodoRepository> {
    repo: R,
    guard: Arc<ReplayGuard>,
    config: EngineConfig,
}

impl<R: TodoRepository> ActionDispatcher<R> {
    pub fn new(repo: R, guard: Arc<ReplayGuard>, config: EngineConfig) -> Self {
        Self {
            repo,
            guard,
            config,
        }
    }

    /// Builds a dispatcher with a private guard derived from `config`.
    pub fn standalone(repo: R, config: EngineConfig) -> Self {
        let guard = Arc::new(ReplayGuard::new(config.contention_policy()));
        Self::new(repo, guard, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn guard(&self) -> &Arc<ReplayGuard> {
        &self.guard
    }

    /// Executes one call to completion.
    pub fn dispatch(&self, call: &ActionCall) -> Result<DispatchOutcome, DispatchError> {
        let started_at = Instant::now();
        let result = self.dispatch_inner(call);
        let duration_ms = started_at.elapsed().as_millis();

        match &result {
            Ok(outcome) => info!(
                "event=dispatch module=service status={} action={} id={} version={} duration_ms={}",
                if outcome.is_replay() { "replayed" } else { "ok" },
                call.action,
                call.id,
                outcome.record().version,
                duration_ms
            ),
            Err(err) => warn!(
                "event=dispatch module=service status=error action={} id={} duration_ms={} error_code={} error={}",
                call.action,
                call.id,
                duration_ms,
                err.kind(),
                err
            ),
        }

        result
    }

    fn dispatch_inner(&self, call: &ActionCall) -> Result<DispatchOutcome, DispatchError> {
        let text = self.validated_text(call)?;
        let _permit = self.guard.acquire(call.id)?;

        if let Some(call_id) = call.call_id.as_deref() {
            if let Some(entry) = self.repo.find_applied_call(call_id)? {
                return replay(call, call_id, entry);
            }
        }

        let ctx = CommitContext {
            caller: &call.caller,
            call_id: call.call_id.as_deref(),
        };
        let record = match (call.action, text) {
            (ActionKind::Add, Some(text)) => {
                self.repo.create_todo(call.id, &call.caller, text, ctx)?
            }
            (ActionKind::Edit, Some(text)) => {
                self.mutate(call, &TodoMutation::SetText(text.to_string()), ctx)?
            }
            (ActionKind::Toggle, _) => self.mutate(call, &TodoMutation::ToggleDone, ctx)?,
            (action, None) => {
                return Err(DispatchError::InvalidCall(format!(
                    "`{action}` requires text"
                )))
            }
        };

        Ok(DispatchOutcome::Committed(record))
    }

    fn mutate(
        &self,
        call: &ActionCall,
        mutation: &TodoMutation,
        ctx: CommitContext<'_>,
    ) -> Result<TodoRecord, DispatchError> {
        let current = self.repo.get_todo(call.id)?;
        authorize(&current, &call.caller)?;
        let base_version = call.expected_version.unwrap_or(current.version);
        Ok(self
            .repo
            .update_todo(call.id, mutation, base_version, ctx)?)
    }

    fn validated_text<'c>(&self, call: &'c ActionCall) -> Result<Option<&'c str>, DispatchError> {
        if !call.action.takes_text() {
            return Ok(None);
        }
        let Some(text) = call.text.as_deref() else {
            return Err(DispatchError::InvalidCall(format!(
                "`{}` requires text",
                call.action
            )));
        };
        let chars = text.chars().count();
        if chars > self.config.max_text_chars {
            return Err(DispatchError::InvalidCall(format!(
                "text has {chars} chars, limit is {}",
                self.config.max_text_chars
            )));
        }
        Ok(Some(text))
    }

    /// Reads one record.
    pub fn get(&self, id: TodoId) -> Result<TodoRecord, DispatchError> {
        Ok(self.repo.get_todo(id)?)
    }

    pub fn list(&self, query: &TodoListQuery) -> RepoResult<Vec<TodoRecord>> {
        self.repo.list_todos(query)
    }

    pub fn history(&self, id: TodoId) -> RepoResult<Vec<JournalEntry>> {
        self.repo.history(id)
    }
}

/// Answers a call whose `call_id` already committed, provided it is the same call.
fn replay(
    call: &ActionCall,
    call_id: &str,
    entry: JournalEntry,
) -> Result<DispatchOutcome, DispatchError> {
    if entry.todo_id != call.id {
        return Err(DispatchError::InvalidCall(format!(
            "call id `{call_id}` was already applied to todo {}",
            entry.todo_id
        )));
    }
    // Journal rows are only written by the record owner.
    if entry.caller != call.caller {
        return Err(DispatchError::NotOwner {
            id: call.id,
            caller: call.caller.clone(),
        });
    }
    if entry.action != journal_action(call.action) {
        return Err(DispatchError::InvalidCall(format!(
            "call id `{call_id}` was already applied as `{}`",
            entry.action.as_str()
        )));
    }
    Ok(DispatchOutcome::Replayed(entry.committed_record()))
}

fn journal_action(kind: ActionKind) -> JournalAction {
    match kind {
        ActionKind::Add => JournalAction::Add,
        ActionKind::Edit => JournalAction::Edit,
        ActionKind::Toggle => JournalAction::Toggle,
    }
}
