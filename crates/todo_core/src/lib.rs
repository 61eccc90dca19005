//! Deterministic state-transition engine for a ledger to-do contract.
//!
//! Calls flow through `ActionDispatcher`: the replay guard claims the record
//! id, the auth guard checks ownership, and the record store commits the
//! new state with a version compare-and-set.

pub mod config;
pub mod db;
pub mod feed;
pub mod guard;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, ContentionMode, EngineConfig};
pub use feed::ingest::{ingest_feed, FeedAction, FeedError, IngestFailure, IngestReport};
pub use guard::auth::{authorize, AuthError};
pub use guard::replay::{ContentionPolicy, InFlightPermit, ReplayError, ReplayGuard};
pub use logging::{
    default_log_level, init_logging, init_logging_with, logging_status, LogTarget, LoggingError,
};
pub use model::principal::{Principal, PrincipalError};
pub use model::todo::{TodoId, TodoMutation, TodoRecord, TodoValidationError, INITIAL_VERSION};
pub use repo::todo_repo::{
    CommitContext, JournalAction, JournalEntry, RepoError, RepoResult, SqliteTodoRepository,
    TodoListQuery, TodoRepository,
};
pub use service::action::{ActionCall, ActionKind};
pub use service::dispatcher::{ActionDispatcher, DispatchError, DispatchOutcome, ErrorKind};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
