pub mod embedding;
pub mod gemini;
pub mod local;

use crate::{errors::ProviderError, history::ChatMessage};
use async_trait::async_trait;
use dyn_clone::DynClone;
use std::fmt::Debug;

pub use embedding::{Embedder, HttpEmbedder};

/// A trait for interacting with an AI provider.
///
/// This trait defines a common interface for text generation against
/// different backends (e.g., Gemini, local OpenAI-compatible servers). All
/// calls should go through the [`crate::gateway::ModelGateway`] rather than
/// hitting a provider directly, so the process-wide throttle applies.
#[async_trait]
pub trait AiProvider: Send + Sync + Debug + DynClone {
    /// Generates a response from a system and user prompt, without history.
    async fn generate(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, ProviderError>;

    /// Generates a response given prior conversation turns followed by the
    /// latest user prompt.
    async fn generate_with_history(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        user_prompt: &str,
    ) -> Result<String, ProviderError>;
}

dyn_clone::clone_trait_object!(AiProvider);
