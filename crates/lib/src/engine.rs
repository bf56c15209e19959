//! # Chat Engine
//!
//! The three-stage conversational pipeline over the knowledge base:
//!
//! 1. **Product identification**: a retrieval-backed call decides which
//!    catalogue products the utterance concerns, or returns a sentinel for
//!    general questions.
//! 2. **Dosage lookup**: one retrieval-backed call per identified product.
//! 3. **Final answer**: the runtime-replaceable system prompt produces the
//!    reply, either with fresh retrieval (sentinel path) or from the
//!    assembled per-product findings (product path).
//!
//! Each stage keeps its own transient sub-log so stage prompts never leak
//! into the durable conversation; the sub-logs are erased at the end of
//! every turn regardless of outcome.

use crate::{
    coordinator::KnowledgeBase,
    errors::KbError,
    gateway::ModelGateway,
    history::{
        stage_session_key, ChatMessage, HistoryStore, STAGE_DOSAGE, STAGE_PRODUCTS,
    },
    index::Retriever,
    prompt::{normalize_prompt, PromptStore},
    prompts::{
        CONTEXTUALIZE_SYSTEM_PROMPT, CONTEXT_PLACEHOLDER, DOSAGE_SYSTEM_PROMPT,
        PRODUCT_IDENTIFICATION_SYSTEM_PROMPT, PRODUCT_SENTINEL,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Upper bound, in characters, on the assembled reference block handed to
/// the final-answer stage.
pub const MAX_CONTEXT_CHARS: usize = 4000;

/// Appended when the assembled reference block had to be cut.
pub const TRUNCATION_MARKER: &str = "… [reference information truncated]";

/// The conversational surface of the knowledge base.
#[async_trait]
pub trait KnowledgeService: Send + Sync {
    /// Runs one full turn for a session and returns the reply text.
    async fn process_query(&self, query: &str, session_key: &str) -> Result<String, KbError>;

    /// Replaces the final-answer system prompt. Returns `false` when the
    /// text was rejected and the active prompt is unchanged.
    async fn update_prompt(&self, new_prompt: &str) -> Result<bool, KbError>;

    /// Erases the durable conversation log (and stage sub-logs) of a session.
    async fn clear_history(&self, session_key: &str) -> Result<(), KbError>;
}

pub struct ChatEngine {
    kb: Arc<KnowledgeBase>,
    gateway: Arc<ModelGateway>,
    history: Arc<dyn HistoryStore>,
    prompt_store: Arc<dyn PromptStore>,
    final_system_prompt: RwLock<String>,
}

impl ChatEngine {
    /// Creates an engine, loading the active final-answer prompt from the
    /// prompt store.
    pub async fn new(
        kb: Arc<KnowledgeBase>,
        gateway: Arc<ModelGateway>,
        history: Arc<dyn HistoryStore>,
        prompt_store: Arc<dyn PromptStore>,
    ) -> Result<Self, KbError> {
        let final_system_prompt = prompt_store.current().await?;
        Ok(Self {
            kb,
            gateway,
            history,
            prompt_store,
            final_system_prompt: RwLock::new(final_system_prompt),
        })
    }

    /// Rewrites a history-dependent utterance into a standalone question.
    /// Skipped entirely when the conversation has no history yet.
    async fn contextualize(
        &self,
        query: &str,
        main_history: &[ChatMessage],
    ) -> Result<String, KbError> {
        if main_history.is_empty() {
            return Ok(query.to_string());
        }
        let standalone = self
            .gateway
            .generate_with_history(CONTEXTUALIZE_SYSTEM_PROMPT, main_history, query)
            .await?;
        debug!(standalone = %standalone, "contextualized query");
        Ok(standalone)
    }

    /// Embeds `query` and returns the retrieved excerpts joined into one
    /// context block.
    async fn retrieve_context(
        &self,
        retriever: &Retriever,
        query: &str,
    ) -> Result<String, KbError> {
        let embedding = self.gateway.embed(query).await?;
        Ok(retriever.retrieve(&embedding).join("\n\n"))
    }

    /// One stage call: fills the stage prompt's placeholder with retrieved
    /// context, generates against the stage sub-log, and records both sides
    /// in that sub-log.
    async fn run_stage(
        &self,
        stage_prompt: &str,
        context: &str,
        stage_key: &str,
        user_prompt: &str,
    ) -> Result<String, KbError> {
        let system_prompt = stage_prompt.replace(CONTEXT_PLACEHOLDER, context);
        let stage_history = self.history.get(stage_key).await?;
        let response = self
            .gateway
            .generate_with_history(&system_prompt, &stage_history, user_prompt)
            .await?;
        self.history
            .append(stage_key, ChatMessage::human(user_prompt))
            .await?;
        self.history
            .append(stage_key, ChatMessage::assistant(&response))
            .await?;
        Ok(response)
    }

    /// Runs the staged pipeline and returns `(final_input, answer)`, where
    /// `final_input` is the text actually fed to the final-answer stage and
    /// recorded as this turn's human entry in the durable log.
    async fn run_turn(&self, query: &str, session_key: &str) -> Result<(String, String), KbError> {
        let main_history = self.history.get(session_key).await?;
        let final_prompt = self.final_system_prompt.read().await.clone();

        let Some(retriever) = self.kb.current_retriever() else {
            // No index installed yet: answer from the final prompt alone so
            // the assistant stays responsive instead of erroring out.
            warn!("no knowledge base index available, answering without retrieval");
            let system_prompt = final_prompt.replace(CONTEXT_PLACEHOLDER, "");
            let answer = self
                .gateway
                .generate_with_history(&system_prompt, &main_history, query)
                .await?;
            return Ok((query.to_string(), answer));
        };

        let standalone = self.contextualize(query, &main_history).await?;
        let products_context = self.retrieve_context(&retriever, &standalone).await?;
        let products_key = stage_session_key(session_key, STAGE_PRODUCTS);
        let identified = self
            .run_stage(
                PRODUCT_IDENTIFICATION_SYSTEM_PROMPT,
                &products_context,
                &products_key,
                &standalone,
            )
            .await?;

        if identified.trim() == PRODUCT_SENTINEL {
            // General question: the final stage retrieves on its own and
            // answers against the durable conversation.
            info!("no specific products identified, answering with retrieval");
            let final_context = self.retrieve_context(&retriever, &standalone).await?;
            let system_prompt = final_prompt.replace(CONTEXT_PLACEHOLDER, &final_context);
            let answer = self
                .gateway
                .generate_with_history(&system_prompt, &main_history, query)
                .await?;
            return Ok((query.to_string(), answer));
        }

        let products: Vec<&str> = identified
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != PRODUCT_SENTINEL)
            .collect();
        info!(count = products.len(), "identified catalogue products");

        let dosage_key = stage_session_key(session_key, STAGE_DOSAGE);
        let mut findings = Vec::with_capacity(products.len());
        for product in products {
            let dosage_context = self.retrieve_context(&retriever, product).await?;
            let dosage = self
                .run_stage(DOSAGE_SYSTEM_PROMPT, &dosage_context, &dosage_key, product)
                .await?;
            findings.push((product.to_string(), dosage));
        }

        // Product path: the reference material is the assembled findings, so
        // the final stage runs without retrieval.
        let assembled = assemble_context(query, &findings);
        let system_prompt = final_prompt.replace(CONTEXT_PLACEHOLDER, "");
        let answer = self
            .gateway
            .generate_with_history(&system_prompt, &main_history, &assembled)
            .await?;
        Ok((assembled, answer))
    }

    async fn clear_stage_logs(&self, session_key: &str) {
        for tag in [STAGE_PRODUCTS, STAGE_DOSAGE] {
            let key = stage_session_key(session_key, tag);
            if let Err(e) = self.history.clear(&key).await {
                warn!(tag, "failed to clear stage log: {e}");
            }
        }
    }
}

#[async_trait]
impl KnowledgeService for ChatEngine {
    async fn process_query(&self, query: &str, session_key: &str) -> Result<String, KbError> {
        let outcome = self.run_turn(query, session_key).await;

        // Stage sub-logs are scoped to one turn; erase them whether the turn
        // succeeded or not so a failed turn cannot pollute the next one.
        self.clear_stage_logs(session_key).await;

        let (final_input, answer) = outcome
            .map_err(|e| KbError::Generation(format!("chat turn failed: {e}")))?;

        // The durable log records what the final stage actually saw, which
        // on the product path is the assembled findings, not the raw words.
        self.history
            .append(session_key, ChatMessage::human(final_input))
            .await?;
        self.history
            .append(session_key, ChatMessage::assistant(&answer))
            .await?;
        Ok(answer)
    }

    async fn update_prompt(&self, new_prompt: &str) -> Result<bool, KbError> {
        if !self.prompt_store.update(new_prompt).await? {
            return Ok(false);
        }
        *self.final_system_prompt.write().await = normalize_prompt(new_prompt);
        info!("final-answer system prompt replaced");
        Ok(true)
    }

    async fn clear_history(&self, session_key: &str) -> Result<(), KbError> {
        self.history.clear(session_key).await?;
        self.clear_stage_logs(session_key).await;
        Ok(())
    }
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("kb", &self.kb)
            .finish_non_exhaustive()
    }
}

/// Joins the original utterance with per-product findings into the input for
/// the final stage, bounded at [`MAX_CONTEXT_CHARS`] characters.
///
/// The utterance itself is never cut; only the findings tail is, and a
/// visible marker is appended whenever truncation happened.
pub fn assemble_context(utterance: &str, findings: &[(String, String)]) -> String {
    let head = format!("{utterance}\n\n");
    let tail = findings
        .iter()
        .map(|(product, dosage)| format!("{product}\n{dosage}"))
        .collect::<Vec<_>>()
        .join("\n\n");

    let head_chars = head.chars().count();
    let tail_chars = tail.chars().count();
    if head_chars + tail_chars <= MAX_CONTEXT_CHARS {
        return format!("{head}{tail}");
    }

    let budget = MAX_CONTEXT_CHARS.saturating_sub(head_chars);
    let cut: String = tail.chars().take(budget).collect();
    format!("{head}{cut}{TRUNCATION_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_context_is_untouched() {
        let findings = vec![("Vitamin C".to_string(), "500 mg daily".to_string())];
        let assembled = assemble_context("how much?", &findings);
        assert_eq!(assembled, "how much?\n\nVitamin C\n500 mg daily");
    }

    #[test]
    fn findings_are_joined_in_order() {
        let findings = vec![
            ("A".to_string(), "one".to_string()),
            ("B".to_string(), "two".to_string()),
        ];
        let assembled = assemble_context("q", &findings);
        assert_eq!(assembled, "q\n\nA\none\n\nB\ntwo");
    }

    #[test]
    fn oversized_tail_is_cut_with_a_marker_and_the_utterance_kept() {
        let findings = vec![("P".to_string(), "x".repeat(MAX_CONTEXT_CHARS * 2))];
        let assembled = assemble_context("the question", &findings);
        assert!(assembled.starts_with("the question\n\n"));
        assert!(assembled.ends_with(TRUNCATION_MARKER));
        let marker_chars = TRUNCATION_MARKER.chars().count();
        assert!(assembled.chars().count() <= MAX_CONTEXT_CHARS + marker_chars);
    }
}
