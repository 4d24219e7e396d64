// flightrec-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Trace Store
// Description: Durable TraceRepository/PolicyRepository backend over SQLite.
// Purpose: Own the connection, schema-version ledger, and the single
//          transactional primitive every multi-row write goes through.
// Dependencies: flightrec-core, rusqlite, thiserror
// ============================================================================

//! ## Overview
//! [`Store`] wraps one `rusqlite::Connection` behind a mutex; [`Store::do_tx`]
//! is the sole write path. WAL journaling permits concurrent readers while
//! that single writer holds the mutex.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use flightrec_core::CoreError;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;

/// Current schema version this crate knows how to open.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout applied to every connection.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Errors raised by the SQLite storage layer before translation into
/// [`CoreError`].
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Filesystem I/O failure opening or preparing the database file.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// A `SQLite` engine error not otherwise classified.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// The on-disk schema version is newer or otherwise incompatible with
    /// this build.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// A uniqueness or foreign-key constraint was violated.
    #[error("sqlite store constraint violation: {0}")]
    Constraint(String),
    /// A row could not be decoded into its domain type.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for CoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => {
                Self::InvalidState(message)
            }
            SqliteStoreError::VersionMismatch(message) => Self::InvalidState(message),
            SqliteStoreError::Constraint(message) => Self::InvalidInput(message),
            SqliteStoreError::Invalid(message) => Self::InvalidInput(message),
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(inner, message)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Constraint(message.clone().unwrap_or_else(|| error.to_string()))
            }
            _ => Self::Db(error.to_string()),
        }
    }
}

/// A durable, `SQLite`-backed store for traces, steps, snapshots,
/// evaluation verdicts, and guardrail policies.
#[derive(Clone)]
pub struct Store {
    connection: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if absent) the database file at `path`, applying
    /// pragmas and schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] when the parent directory cannot
    /// be created, the connection cannot be opened, or the on-disk schema
    /// version is incompatible with this build.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        ensure_parent_dir(path).map_err(CoreError::from)?;
        let mut connection = open_connection(path).map_err(CoreError::from)?;
        run_migrations(&mut connection).map_err(CoreError::from)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Runs `f` inside one transaction, committing on success and rolling
    /// back (via `Transaction::drop`) on failure.
    ///
    /// This is the single transactional primitive every multi-row write in
    /// this crate goes through.
    ///
    /// # Errors
    ///
    /// Propagates whatever error `f` returns, or a translated
    /// [`SqliteStoreError`] if the transaction itself cannot be opened or
    /// committed.
    pub fn do_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut guard =
            self.connection.lock().map_err(|_| CoreError::InvalidState("store mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
        let result = f(&tx)?;
        tx.commit().map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
        Ok(result)
    }
}

/// Ensures the parent directory of `path` exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Opens a connection with the flags and pragmas this store requires.
fn open_connection(path: &Path) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(path, flags)?;
    apply_pragmas(&connection)?;
    Ok(connection)
}

/// Applies the pragmas this store requires for durability and
/// concurrent-reader access.
fn apply_pragmas(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection.execute_batch("PRAGMA journal_mode = WAL;")?;
    connection.busy_timeout(std::time::Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// Applies schema version 1 if the database is fresh; rejects any other
/// version as incompatible (migration discipline is monotonic, and only
/// v0 -> v1 exists today).
fn run_migrations(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL, applied_at TEXT NOT NULL);")?;
    let version: Option<i64> =
        tx.query_row("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1", params![], |row| {
            row.get(0)
        })
        .optional()?;

    match version {
        None => {
            apply_schema_v1(&tx)?;
            tx.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, flightrec_core::clock::now_iso8601()],
            )?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => {
            return Err(SqliteStoreError::VersionMismatch(format!("unsupported schema version: {v}")));
        }
    }

    tx.commit()?;
    Ok(())
}

/// Creates every table, index, and constraint for schema version 1.
fn apply_schema_v1(tx: &Transaction<'_>) -> Result<(), SqliteStoreError> {
    tx.execute_batch(
        "CREATE TABLE agent_traces (
            id TEXT PRIMARY KEY,
            agent_name TEXT NOT NULL,
            agent_version TEXT,
            trigger TEXT NOT NULL CHECK (trigger IN ('manual','user_message','cron','webhook','api','event')),
            status TEXT NOT NULL CHECK (status IN ('running','completed','failed','timeout')),
            input TEXT NOT NULL DEFAULT '{}',
            output TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            total_duration_ms INTEGER,
            total_tokens INTEGER,
            total_cost_usd REAL,
            error TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            parent_trace_id TEXT REFERENCES agent_traces(id) ON DELETE SET NULL,
            forked_from_step INTEGER,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_agent_traces_status ON agent_traces (status);
        CREATE INDEX idx_agent_traces_agent_name ON agent_traces (agent_name);
        CREATE INDEX idx_agent_traces_started_at ON agent_traces (started_at DESC);
        CREATE INDEX idx_agent_traces_parent_trace_id ON agent_traces (parent_trace_id);

        CREATE TABLE agent_trace_steps (
            id TEXT PRIMARY KEY,
            trace_id TEXT NOT NULL REFERENCES agent_traces(id) ON DELETE CASCADE,
            step_number INTEGER NOT NULL,
            step_type TEXT NOT NULL CHECK (step_type IN
                ('thought','tool_call','llm_call','retrieval','output','decision','error','guard_check')),
            name TEXT NOT NULL,
            input TEXT NOT NULL DEFAULT '{}',
            output TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            duration_ms INTEGER,
            tokens_used INTEGER,
            model TEXT,
            error TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            UNIQUE (trace_id, step_number)
        );
        CREATE INDEX idx_agent_trace_steps_trace_number ON agent_trace_steps (trace_id, step_number);
        CREATE INDEX idx_agent_trace_steps_trace_type ON agent_trace_steps (trace_id, step_type);

        CREATE TABLE agent_trace_snapshots (
            id TEXT PRIMARY KEY,
            step_id TEXT NOT NULL UNIQUE REFERENCES agent_trace_steps(id) ON DELETE CASCADE,
            context_window TEXT NOT NULL DEFAULT '{}',
            environment TEXT NOT NULL DEFAULT '{}',
            tool_state TEXT NOT NULL DEFAULT '{}',
            token_count INTEGER NOT NULL DEFAULT 0 CHECK (token_count >= 0)
        );
        CREATE INDEX idx_agent_trace_snapshots_step_id ON agent_trace_snapshots (step_id);

        CREATE TABLE agent_trace_evals (
            id TEXT PRIMARY KEY,
            trace_id TEXT NOT NULL REFERENCES agent_traces(id) ON DELETE CASCADE,
            evaluator_type TEXT NOT NULL CHECK (evaluator_type IN ('rubric','llm_judge','policy_check')),
            evaluator_name TEXT NOT NULL,
            score REAL NOT NULL,
            passed INTEGER NOT NULL CHECK (passed IN (0, 1)),
            details TEXT NOT NULL DEFAULT '{}',
            evaluated_at TEXT NOT NULL
        );
        CREATE INDEX idx_agent_trace_evals_trace_id ON agent_trace_evals (trace_id);

        CREATE TABLE guardrail_policies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            action TEXT NOT NULL CHECK (action IN ('allow','deny','warn','require_review')),
            priority INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1 CHECK (enabled IN (0, 1)),
            match_pattern TEXT NOT NULL DEFAULT '{}',
            action_params TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX idx_guardrail_policies_action ON guardrail_policies (action);
        CREATE INDEX idx_guardrail_policies_enabled ON guardrail_policies (enabled);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Store;

    #[test]
    fn opens_and_reopens_a_fresh_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("traces.db");
        let store = Store::open(&path).expect("first open applies schema v1");
        drop(store);
        let _reopened = Store::open(&path).expect("second open matches schema v1");
    }
}
