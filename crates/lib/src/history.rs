//! # Conversation History
//!
//! Per-session message logs backed by the durable SQLite store. Each logical
//! user has one durable "main" log plus transient stage sub-logs ("products",
//! "dosage") whose keys are derived deterministically from the main session
//! key; the chat engine erases the stage logs at the end of every turn.

use crate::{errors::KbError, storage::SqliteProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use turso::{params, Value as TursoValue};
use uuid::Uuid;

/// Stage tag for the product-identification sub-log.
pub const STAGE_PRODUCTS: &str = "products";

/// Stage tag for the dosage-lookup sub-log.
pub const STAGE_DOSAGE: &str = "dosage";

/// Derives the session key for a stage sub-log. The same `(main_key, tag)`
/// pair always yields the same sub-key.
pub fn stage_session_key(main_key: &str, tag: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{main_key}/{tag}").as_bytes(),
    )
    .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    Human,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::Human => "human",
            ChatRole::Assistant => "assistant",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "assistant" => ChatRole::Assistant,
            _ => ChatRole::Human,
        }
    }
}

/// One message of a session log.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Human,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// An explicit history-store capability; never a bare process-global map.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Returns the log for a session key in insertion order.
    async fn get(&self, session_key: &str) -> Result<Vec<ChatMessage>, KbError>;

    /// Appends one message to a session log.
    async fn append(&self, session_key: &str, message: ChatMessage) -> Result<(), KbError>;

    /// Erases the log for a session key.
    async fn clear(&self, session_key: &str) -> Result<(), KbError>;
}

/// SQLite-backed history store over the `chat_history` table.
#[derive(Clone, Debug)]
pub struct SqliteHistoryStore {
    provider: SqliteProvider,
}

impl SqliteHistoryStore {
    pub fn new(provider: SqliteProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn get(&self, session_key: &str) -> Result<Vec<ChatMessage>, KbError> {
        let conn = self.provider.db.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT role, content, created_at FROM chat_history
                 WHERE session_key = ? ORDER BY id",
            )
            .await?;
        let mut rows = stmt.query(params![session_key]).await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            let role = match row.get_value(0)? {
                TursoValue::Text(s) => s,
                _ => String::new(),
            };
            let content = match row.get_value(1)? {
                TursoValue::Text(s) => s,
                _ => String::new(),
            };
            let created_at = match row.get_value(2)? {
                TursoValue::Text(s) => s
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
                _ => Utc::now(),
            };
            messages.push(ChatMessage {
                role: ChatRole::from_str(&role),
                content,
                created_at,
            });
        }
        Ok(messages)
    }

    async fn append(&self, session_key: &str, message: ChatMessage) -> Result<(), KbError> {
        let conn = self.provider.db.connect()?;
        conn.execute(
            "INSERT INTO chat_history (session_key, role, content, created_at)
             VALUES (?, ?, ?, ?)",
            params![
                session_key,
                message.role.as_str(),
                message.content,
                message.created_at.to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }

    async fn clear(&self, session_key: &str) -> Result<(), KbError> {
        let conn = self.provider.db.connect()?;
        let deleted = conn
            .execute(
                "DELETE FROM chat_history WHERE session_key = ?",
                params![session_key],
            )
            .await?;
        debug!(session_key, deleted, "cleared session history");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_keys_are_deterministic_and_distinct() {
        let main = "7d9fdc12-5b34-5c55-9a5e-000000000001";
        let a = stage_session_key(main, STAGE_PRODUCTS);
        let b = stage_session_key(main, STAGE_PRODUCTS);
        let c = stage_session_key(main, STAGE_DOSAGE);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, main);
    }
}
