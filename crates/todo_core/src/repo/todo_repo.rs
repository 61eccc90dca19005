//! To-do record repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide create/get/update/list APIs over the `todos` table.
//! - Maintain the `todo_journal` audit and replay index.
//!
//! # Invariants
//! - `create_todo` fails with `DuplicateId` and writes nothing when the id
//!   already exists.
//! - `update_todo` checks existence and `expected_version` inside an
//!   IMMEDIATE transaction before applying any change.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::principal::Principal;
use crate::model::todo::{TodoId, TodoMutation, TodoRecord, TodoValidationError};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

const TODO_SELECT_SQL: &str = "SELECT id, owner, text, done, version FROM todos";
const JOURNAL_SELECT_SQL: &str = "SELECT
    seq,
    todo_id,
    action,
    caller,
    call_id,
    version,
    text,
    done,
    recorded_at
FROM todo_journal";

const TODOS_DEFAULT_LIMIT: u32 = 50;
const TODOS_LIMIT_MAX: u32 = 500;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from record store operations.
#[derive(Debug)]
pub enum RepoError {
    /// Record state failed model validation.
    Validation(TodoValidationError),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// `create_todo` on an id that already exists.
    DuplicateId(TodoId),
    /// Target record does not exist.
    NotFound(TodoId),
    /// Stored version differs from the caller's base version.
    VersionConflict {
        id: TodoId,
        expected: u64,
        actual: u64,
    },
    /// The journal already holds a commit for this call id.
    CallAlreadyApplied(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::DuplicateId(id) => write!(f, "todo already exists: {id}"),
            Self::NotFound(id) => write!(f, "todo not found: {id}"),
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on todo {id}: expected {expected}, stored {actual}"
            ),
            Self::CallAlreadyApplied(call_id) => write!(f, "call already applied: {call_id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "todo repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "todo repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "todo repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted todo data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TodoValidationError> for RepoError {
    fn from(value: TodoValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Action name recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    Add,
    Edit,
    Toggle,
}

impl JournalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Toggle => "toggle",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(Self::Add),
            "edit" => Some(Self::Edit),
            "toggle" => Some(Self::Toggle),
            _ => None,
        }
    }

    fn of(mutation: &TodoMutation) -> Self {
        match mutation {
            TodoMutation::SetText(_) => Self::Edit,
            TodoMutation::ToggleDone => Self::Toggle,
        }
    }
}

/// Who committed a write, and under which replay key.
#[derive(Debug, Clone, Copy)]
pub struct CommitContext<'a> {
    pub caller: &'a Principal,
    pub call_id: Option<&'a str>,
}

/// One committed action with the record state it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    /// Monotonic journal position.
    pub seq: i64,
    pub todo_id: TodoId,
    pub action: JournalAction,
    pub caller: Principal,
    pub call_id: Option<String>,
    /// Record version after this action.
    pub version: u64,
    pub text: String,
    pub done: bool,
    /// Epoch ms commit timestamp.
    pub recorded_at: i64,
}

impl JournalEntry {
    /// Rebuilds the record state committed by this entry.
    ///
    /// Only the owner can commit, so the caller is the owner.
    pub fn committed_record(&self) -> TodoRecord {
        TodoRecord {
            id: self.todo_id,
            owner: self.caller.clone(),
            text: self.text.clone(),
            done: self.done,
            version: self.version,
        }
    }
}

/// Query options for listing records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoListQuery {
    /// Only records owned by this principal.
    pub owner: Option<Principal>,
    /// Only records with this completion state.
    pub done: Option<bool>,
    /// Maximum rows to return. Defaults to 50 and clamps to 500.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for the contract table.
pub trait TodoRepository {
    /// Inserts `{id, owner, text, done:false, version:1}`.
    fn create_todo(
        &self,
        id: TodoId,
        owner: &Principal,
        text: &str,
        ctx: CommitContext<'_>,
    ) -> RepoResult<TodoRecord>;
    /// Loads one record, failing with `NotFound` when absent.
    fn get_todo(&self, id: TodoId) -> RepoResult<TodoRecord>;
    /// Applies `mutation` when the stored version equals `expected_version`.
    fn update_todo(
        &self,
        id: TodoId,
        mutation: &TodoMutation,
        expected_version: u64,
        ctx: CommitContext<'_>,
    ) -> RepoResult<TodoRecord>;
    fn list_todos(&self, query: &TodoListQuery) -> RepoResult<Vec<TodoRecord>>;
    /// Journal rows for one record, oldest first.
    fn history(&self, id: TodoId) -> RepoResult<Vec<JournalEntry>>;
    /// Looks up the commit made under `call_id`, if any.
    fn find_applied_call(&self, call_id: &str) -> RepoResult<Option<JournalEntry>>;
}

/// SQLite-backed record store.
pub struct SqliteTodoRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTodoRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_todo_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl TodoRepository for SqliteTodoRepository<'_> {
    fn create_todo(
        &self,
        id: TodoId,
        owner: &Principal,
        text: &str,
        ctx: CommitContext<'_>,
    ) -> RepoResult<TodoRecord> {
        let record = TodoRecord::new(id, owner.clone(), text);
        record.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if load_todo(&tx, id)?.is_some() {
            return Err(RepoError::DuplicateId(id));
        }

        tx.execute(
            "INSERT INTO todos (id, owner, text, done, version)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                id_to_db(record.id),
                record.owner.as_str(),
                record.text.as_str(),
                bool_to_int(record.done),
                version_to_db(record.version)?,
            ],
        )?;
        append_journal(&tx, &record, JournalAction::Add, ctx)?;
        tx.commit()?;

        Ok(record)
    }

    fn get_todo(&self, id: TodoId) -> RepoResult<TodoRecord> {
        load_todo(self.conn, id)?.ok_or(RepoError::NotFound(id))
    }

    fn update_todo(
        &self,
        id: TodoId,
        mutation: &TodoMutation,
        expected_version: u64,
        ctx: CommitContext<'_>,
    ) -> RepoResult<TodoRecord> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut record = load_todo(&tx, id)?.ok_or(RepoError::NotFound(id))?;
        if record.version != expected_version {
            return Err(RepoError::VersionConflict {
                id,
                expected: expected_version,
                actual: record.version,
            });
        }

        record.apply(mutation)?;
        let changed = tx.execute(
            "UPDATE todos
             SET
                text = ?2,
                done = ?3,
                version = ?4,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND version = ?5;",
            params![
                id_to_db(id),
                record.text.as_str(),
                bool_to_int(record.done),
                version_to_db(record.version)?,
                version_to_db(expected_version)?,
            ],
        )?;
        if changed == 0 {
            let actual = load_todo(&tx, id)?.map_or(0, |current| current.version);
            return Err(RepoError::VersionConflict {
                id,
                expected: expected_version,
                actual,
            });
        }

        append_journal(&tx, &record, JournalAction::of(mutation), ctx)?;
        tx.commit()?;

        Ok(record)
    }

    fn list_todos(&self, query: &TodoListQuery) -> RepoResult<Vec<TodoRecord>> {
        let mut sql = format!("{TODO_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(owner) = query.owner.as_ref() {
            sql.push_str(" AND owner = ?");
            bind_values.push(Value::Text(owner.as_str().to_string()));
        }
        if let Some(done) = query.done {
            sql.push_str(" AND done = ?");
            bind_values.push(Value::Integer(bool_to_int(done)));
        }

        // Unsigned order over the bit-cast key: high ids are stored negative.
        sql.push_str(" ORDER BY (id < 0) ASC, id ASC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(normalize_todo_limit(query.limit))));
        if query.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_todo_row(row)?);
        }

        Ok(records)
    }

    fn history(&self, id: TodoId) -> RepoResult<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{JOURNAL_SELECT_SQL}
             WHERE todo_id = ?1
             ORDER BY seq ASC;"
        ))?;
        let mut rows = stmt.query([id_to_db(id)])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_journal_row(row)?);
        }

        Ok(entries)
    }

    fn find_applied_call(&self, call_id: &str) -> RepoResult<Option<JournalEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{JOURNAL_SELECT_SQL} WHERE call_id = ?1;"))?;
        let mut rows = stmt.query([call_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_journal_row(row)?));
        }

        Ok(None)
    }
}

/// Normalizes list limit to `[1, TODOS_LIMIT_MAX]`.
pub fn normalize_todo_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => TODOS_DEFAULT_LIMIT,
        Some(value) => value.min(TODOS_LIMIT_MAX),
    }
}

fn load_todo(conn: &Connection, id: TodoId) -> RepoResult<Option<TodoRecord>> {
    let row = conn
        .query_row(
            &format!("{TODO_SELECT_SQL} WHERE id = ?1;"),
            [id_to_db(id)],
            |row| {
                Ok((
                    row.get::<_, i64>("id")?,
                    row.get::<_, String>("owner")?,
                    row.get::<_, String>("text")?,
                    row.get::<_, i64>("done")?,
                    row.get::<_, i64>("version")?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, owner, text, done, version)| build_record(id, &owner, text, done, version))
        .transpose()
}

fn append_journal(
    tx: &Transaction<'_>,
    record: &TodoRecord,
    action: JournalAction,
    ctx: CommitContext<'_>,
) -> RepoResult<()> {
    let inserted = tx.execute(
        "INSERT INTO todo_journal (todo_id, action, caller, call_id, version, text, done)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        params![
            id_to_db(record.id),
            action.as_str(),
            ctx.caller.as_str(),
            ctx.call_id,
            version_to_db(record.version)?,
            record.text.as_str(),
            bool_to_int(record.done),
        ],
    );

    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation && ctx.call_id.is_some() =>
        {
            Err(RepoError::CallAlreadyApplied(
                ctx.call_id.map(str::to_string).unwrap_or_default(),
            ))
        }
        Err(err) => Err(err.into()),
    }
}

fn parse_todo_row(row: &Row<'_>) -> RepoResult<TodoRecord> {
    let owner: String = row.get("owner")?;
    build_record(
        row.get("id")?,
        &owner,
        row.get("text")?,
        row.get("done")?,
        row.get("version")?,
    )
}

fn build_record(
    id: i64,
    owner: &str,
    text: String,
    done: i64,
    version: i64,
) -> RepoResult<TodoRecord> {
    let record = TodoRecord {
        id: id_from_db(id),
        owner: parse_principal(owner, "todos.owner")?,
        text,
        done: int_to_bool(done, "todos.done")?,
        version: version_from_db(version, "todos.version")?,
    };
    record.validate()?;
    Ok(record)
}

fn parse_journal_row(row: &Row<'_>) -> RepoResult<JournalEntry> {
    let action_text: String = row.get("action")?;
    let action = JournalAction::parse(&action_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid action `{action_text}` in todo_journal.action"
        ))
    })?;
    let caller: String = row.get("caller")?;

    Ok(JournalEntry {
        seq: row.get("seq")?,
        todo_id: id_from_db(row.get("todo_id")?),
        action,
        caller: parse_principal(&caller, "todo_journal.caller")?,
        call_id: row.get("call_id")?,
        version: version_from_db(row.get("version")?, "todo_journal.version")?,
        text: row.get("text")?,
        done: int_to_bool(row.get("done")?, "todo_journal.done")?,
        recorded_at: row.get("recorded_at")?,
    })
}

fn parse_principal(value: &str, column: &'static str) -> RepoResult<Principal> {
    Principal::parse(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid principal `{value}` in {column}")))
}

/// Stores the full `u64` range in SQLite's signed INTEGER by bit pattern.
fn id_to_db(id: TodoId) -> i64 {
    i64::from_ne_bytes(id.to_ne_bytes())
}

fn id_from_db(value: i64) -> TodoId {
    u64::from_ne_bytes(value.to_ne_bytes())
}

fn version_to_db(version: u64) -> RepoResult<i64> {
    i64::try_from(version)
        .map_err(|_| RepoError::InvalidData(format!("version {version} exceeds storage range")))
}

fn version_from_db(value: i64, column: &'static str) -> RepoResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid version `{value}` in {column}")))
}

fn int_to_bool(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_todo_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    let required: [(&'static str, &[&'static str]); 2] = [
        ("todos", &["id", "owner", "text", "done", "version"][..]),
        (
            "todo_journal",
            &["seq", "todo_id", "action", "caller", "call_id", "version"][..],
        ),
    ];
    for (table, columns) in required {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RepoError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::{id_from_db, id_to_db, normalize_todo_limit};

    #[test]
    fn id_bit_cast_covers_full_unsigned_range() {
        for id in [0, 1, i64::MAX as u64, i64::MAX as u64 + 1, u64::MAX] {
            assert_eq!(id_from_db(id_to_db(id)), id);
        }
    }

    #[test]
    fn list_limit_defaults_and_clamps() {
        assert_eq!(normalize_todo_limit(None), 50);
        assert_eq!(normalize_todo_limit(Some(0)), 50);
        assert_eq!(normalize_todo_limit(Some(7)), 7);
        assert_eq!(normalize_todo_limit(Some(10_000)), 500);
    }
}
