//! # SQLite Storage
//!
//! A thin provider around a local Turso/SQLite database holding conversation
//! history and system-prompt versions. The schema is created idempotently on
//! startup.

use crate::errors::KbError;
use std::fmt::{self, Debug};
use turso::Database;

const CREATE_CHAT_HISTORY_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS chat_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_key TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    )";

const CREATE_CHAT_HISTORY_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_chat_history_session
    ON chat_history (session_key)";

const CREATE_SYSTEM_PROMPTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS system_prompts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        prompt_text TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )";

/// All statements required to bring a database up to the current schema.
pub const ALL_TABLE_CREATION_SQL: &[&str] = &[
    CREATE_CHAT_HISTORY_TABLE,
    CREATE_CHAT_HISTORY_INDEX,
    CREATE_SYSTEM_PROMPTS_TABLE,
];

/// A provider for interacting with a local SQLite database using Turso.
///
/// Holds a `Database` instance managing a connection pool. When cloned, it
/// shares the same underlying database, allowing concurrent access to the
/// same file or in-memory instance.
#[derive(Clone)]
pub struct SqliteProvider {
    pub db: Database,
}

impl SqliteProvider {
    /// Creates a new `SqliteProvider` from a file path, or `":memory:"` for
    /// an isolated in-memory database (clone the provider to share it).
    pub async fn new(db_path: &str) -> Result<Self, KbError> {
        let db = turso::Builder::new_local(db_path).build().await?;

        // WAL mode helps concurrency on file-based databases and is a no-op
        // in memory. PRAGMA returns a row, so `query` is used over `execute`.
        let conn = db.connect()?;
        conn.query("PRAGMA journal_mode=WAL;", ()).await?;

        Ok(Self { db })
    }

    /// Ensures all required tables and indexes exist. Idempotent; safe to
    /// call on every startup.
    pub async fn initialize_schema(&self) -> Result<(), KbError> {
        let conn = self.db.connect()?;
        for statement in ALL_TABLE_CREATION_SQL {
            conn.execute(statement, ()).await?;
        }
        Ok(())
    }
}

impl Debug for SqliteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteProvider").finish_non_exhaustive()
    }
}

impl AsRef<Database> for SqliteProvider {
    fn as_ref(&self) -> &Database {
        &self.db
    }
}
