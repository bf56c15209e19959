//! # System Prompt Versions
//!
//! The active system prompt is a versioned text blob: updates append a new
//! row rather than mutating, and the most recently updated row wins. Every
//! stored prompt is normalized first so it always carries the `{context}`
//! substitution placeholder.

use crate::{errors::KbError, prompts::CONTEXT_PLACEHOLDER, storage::SqliteProvider};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use turso::{params, Value as TursoValue};

const TRIPLE_QUOTE: &str = "\"\"\"";

/// Normalizes a raw prompt for storage.
///
/// Rule: wrap the text in triple-quote delimiters when it is not already
/// wrapped, then append the `{context}` placeholder when absent. This
/// auto-fix is deliberate behavior, not an error path.
pub fn normalize_prompt(text: &str) -> String {
    let trimmed = text.trim();
    let wrapped = if trimmed.len() >= TRIPLE_QUOTE.len() * 2
        && trimmed.starts_with(TRIPLE_QUOTE)
        && trimmed.ends_with(TRIPLE_QUOTE)
    {
        trimmed.to_string()
    } else {
        format!("{TRIPLE_QUOTE}\n{trimmed}\n{TRIPLE_QUOTE}")
    };

    if wrapped.contains(CONTEXT_PLACEHOLDER) {
        wrapped
    } else {
        format!("{wrapped}\n\n{CONTEXT_PLACEHOLDER}")
    }
}

/// Versioned storage of the active system prompt.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// The currently active prompt text (most recently updated version).
    async fn current(&self) -> Result<String, KbError>;

    /// Normalizes and appends a new prompt version. Returns `false` when
    /// the raw text is rejected (empty or delimiter-only) instead of
    /// storing it.
    async fn update(&self, prompt_text: &str) -> Result<bool, KbError>;
}

/// SQLite-backed prompt store over the `system_prompts` table, falling back
/// to a configured initial prompt while the table is empty.
#[derive(Clone, Debug)]
pub struct SqlitePromptStore {
    provider: SqliteProvider,
    initial_prompt: String,
}

impl SqlitePromptStore {
    pub fn new(provider: SqliteProvider, initial_prompt: impl Into<String>) -> Self {
        Self {
            provider,
            initial_prompt: initial_prompt.into(),
        }
    }
}

#[async_trait]
impl PromptStore for SqlitePromptStore {
    async fn current(&self) -> Result<String, KbError> {
        let conn = self.provider.db.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT prompt_text FROM system_prompts
                 ORDER BY updated_at DESC, id DESC LIMIT 1",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        if let Some(row) = rows.next().await? {
            if let TursoValue::Text(prompt) = row.get_value(0)? {
                return Ok(prompt);
            }
        }
        info!("no stored system prompt, using the initial prompt");
        Ok(self.initial_prompt.clone())
    }

    async fn update(&self, prompt_text: &str) -> Result<bool, KbError> {
        let trimmed = prompt_text.trim();
        if trimmed.is_empty() || trimmed == TRIPLE_QUOTE {
            warn!("rejected empty system prompt update");
            return Ok(false);
        }

        let normalized = normalize_prompt(prompt_text);
        let now = Utc::now().to_rfc3339();
        let conn = self.provider.db.connect()?;
        conn.execute(
            "INSERT INTO system_prompts (prompt_text, created_at, updated_at)
             VALUES (?, ?, ?)",
            params![normalized.clone(), now.clone(), now],
        )
        .await?;
        info!(length = normalized.len(), "stored new system prompt version");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_unwrapped_text_and_appends_placeholder() {
        let normalized = normalize_prompt("You are a helpful assistant.");
        assert!(normalized.starts_with(TRIPLE_QUOTE));
        assert!(normalized.contains("You are a helpful assistant."));
        assert!(normalized.ends_with(CONTEXT_PLACEHOLDER));
    }

    #[test]
    fn keeps_existing_wrapping_and_placeholder() {
        let input = "\"\"\"\nAnswer using {context}.\n\"\"\"";
        let normalized = normalize_prompt(input);
        assert_eq!(normalized, input);
    }

    #[test]
    fn renormalizing_never_duplicates_the_placeholder() {
        let once = normalize_prompt("Be brief.");
        let twice = normalize_prompt(&once);
        assert_eq!(once.matches(TRIPLE_QUOTE).count(), 2);
        assert!(twice.contains("Be brief."));
        assert_eq!(twice.matches(CONTEXT_PLACEHOLDER).count(), 1);
    }
}
