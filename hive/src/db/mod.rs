//! SQLite persistence for the core's metadata: agents, threads, messages,
//! runs, workflows, executions, triggers, credentials, users, and the
//! advisory-lock table.
//!
//! Every operation opens its own connection inside `spawn_blocking`, so the
//! async runtime never blocks on SQLite. The database file is shared across
//! processes on one host; `busy_timeout` plus short transactions keep writers
//! cooperative. The `agent_locks` table is the only cross-process
//! serialisation point for agent-run exclusivity.

pub mod agents;
mod locks;
mod runs;
pub mod threads;
mod triggers;
mod users;
mod workflows;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::HiveError;

pub use agents::NewAgent;
pub use locks::AgentLockGuard;
pub use threads::NewMessage;

/// Handle to the metadata database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Db {
    path: Arc<PathBuf>,
}

impl Db {
    /// Opens (creating if absent) the database and applies migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, HiveError> {
        let path = path.as_ref().to_path_buf();
        let db = Self {
            path: Arc::new(path),
        };
        db.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(db)
    }

    /// Runs `f` with a fresh connection on the blocking pool.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T, HiveError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, HiveError> + Send + 'static,
    {
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(path.as_ref())
                .map_err(|e| HiveError::Internal(e.to_string()))?;
            conn.busy_timeout(std::time::Duration::from_secs(5))
                .map_err(|e| HiveError::Internal(e.to_string()))?;
            f(&conn)
        })
        .await?
    }
}

/// RFC 3339 text is the canonical timestamp encoding in every table.
pub(crate) fn ts_to_sql(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub(crate) fn sql_to_ts(s: &str) -> Result<DateTime<Utc>, HiveError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| HiveError::Internal(format!("bad timestamp '{s}': {e}")))
}

pub(crate) fn opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, HiveError> {
    s.as_deref().map(sql_to_ts).transpose()
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT,
    role TEXT NOT NULL DEFAULT 'USER',
    custom_instructions TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    name TEXT NOT NULL,
    model TEXT NOT NULL,
    system_instructions TEXT NOT NULL DEFAULT '',
    task_instructions TEXT NOT NULL DEFAULT '',
    allowed_tools TEXT,
    schedule TEXT,
    config TEXT,
    status TEXT NOT NULL DEFAULT 'idle',
    last_run_at TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agents_owner ON agents(owner_id);

CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER NOT NULL REFERENCES agents(id),
    title TEXT NOT NULL,
    thread_type TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_threads_agent ON threads(agent_id);

CREATE TABLE IF NOT EXISTS thread_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id INTEGER NOT NULL REFERENCES threads(id),
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    tool_calls TEXT,
    tool_call_id TEXT,
    tool_name TEXT,
    sent_at TEXT NOT NULL,
    parent_id INTEGER,
    processed INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON thread_messages(thread_id);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER NOT NULL REFERENCES agents(id),
    thread_id INTEGER,
    status TEXT NOT NULL,
    trigger TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    duration_ms INTEGER,
    total_tokens INTEGER,
    total_cost_usd REAL,
    error TEXT,
    summary TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_agent ON runs(agent_id);

CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    agent_id INTEGER,
    connector_type TEXT NOT NULL,
    secret TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_credentials_owner ON credentials(owner_id, connector_type);

CREATE TABLE IF NOT EXISTS workflows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    name TEXT NOT NULL,
    canvas TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(owner_id, name)
);

CREATE TABLE IF NOT EXISTS workflow_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id INTEGER NOT NULL REFERENCES workflows(id),
    phase TEXT NOT NULL DEFAULT 'waiting',
    result TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    cancel_reason TEXT,
    started_at TEXT,
    finished_at TEXT,
    duration_ms INTEGER,
    error TEXT,
    triggered_by TEXT
);
CREATE INDEX IF NOT EXISTS idx_executions_workflow ON workflow_executions(workflow_id);

CREATE TABLE IF NOT EXISTS node_execution_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL REFERENCES workflow_executions(id),
    node_id TEXT NOT NULL,
    phase TEXT NOT NULL DEFAULT 'waiting',
    result TEXT,
    output TEXT,
    error TEXT,
    started_at TEXT,
    finished_at TEXT,
    duration_ms INTEGER,
    UNIQUE(execution_id, node_id)
);

CREATE TABLE IF NOT EXISTS triggers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER NOT NULL REFERENCES agents(id),
    trigger_type TEXT NOT NULL,
    config TEXT NOT NULL,
    history_id TEXT,
    watch_expiry TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_locks (
    agent_id INTEGER PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);
"#;

#[cfg(test)]
pub(crate) mod test_support {
    use super::Db;

    /// Opens a fresh database in a temp directory; the directory guard must be
    /// kept alive for the test's duration.
    pub async fn open_temp() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("hive.db")).await.unwrap();
        (dir, db)
    }
}
