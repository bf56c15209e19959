use thiserror::Error;

/// Errors produced by calls to the AI/embedding backend.
///
/// The gateway inspects these to decide whether a failed call is worth
/// retrying: only `Request` and `Timeout` are considered transient.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to build Reqwest client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("Failed to send request to AI backend: {0}")]
    Request(reqwest::Error),
    #[error("Failed to deserialize AI backend response: {0}")]
    Deserialization(reqwest::Error),
    #[error("AI backend returned an error: {0}")]
    Api(String),
    #[error("AI backend call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ProviderError {
    /// Whether a bounded retry at the gateway makes sense for this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Request(_) | ProviderError::Timeout(_))
    }
}

/// Domain errors for the knowledge base and chat pipeline.
#[derive(Error, Debug)]
pub enum KbError {
    /// The uploaded catalogue could not be parsed with any known delimiter.
    #[error("Catalogue format error: {0}")]
    Format(String),
    /// The input was rejected before any mutation (empty, oversized, missing).
    #[error("Validation failed: {0}")]
    Validation(String),
    /// Invalid path configuration, e.g. scratch nested inside the live index.
    #[error("Configuration error: {0}")]
    Config(String),
    /// The embedding/generation backend failed or timed out.
    #[error("Backend error: {0}")]
    Backend(#[from] ProviderError),
    /// The filesystem swap failed, or the swapped index failed to reload.
    #[error("Install error: {0}")]
    Install(String),
    /// The chat pipeline aborted; stage-log cleanup has already run.
    #[error("Generation error: {0}")]
    Generation(String),
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
