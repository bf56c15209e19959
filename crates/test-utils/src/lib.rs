//! Shared helpers for integration tests: an isolated in-memory database
//! setup plus scripted AI and embedding backends.

use anyhow::Result;
use async_trait::async_trait;
use catalograg::{
    errors::ProviderError,
    history::ChatMessage,
    providers::ai::{AiProvider, Embedder},
    storage::SqliteProvider,
};
use std::{
    collections::VecDeque,
    fmt::Debug,
    sync::{Arc, Mutex},
};

// --- Test Setup ---

/// Manages database creation for each test.
pub struct TestSetup {
    pub provider: SqliteProvider,
}

impl TestSetup {
    /// Creates a new, isolated in-memory database and initializes the schema.
    pub async fn new() -> Result<Self> {
        let provider = SqliteProvider::new(":memory:").await?;
        provider.initialize_schema().await?;
        Ok(Self { provider })
    }
}

// --- Mock AI Provider ---

/// A scripted AI backend: responses are returned in the order they were
/// queued, one per `generate*` call, and every call is recorded for
/// assertion. An unscripted call fails, which doubles as a way to induce
/// backend failures at a chosen point in a pipeline.
#[derive(Clone, Debug)]
pub struct MockAiProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockAiProvider {
    pub fn new(scripted_responses: Vec<&str>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                scripted_responses.into_iter().map(String::from).collect(),
            )),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues one more response at the end of the script.
    pub fn push_response(&self, response: &str) {
        self.responses.lock().unwrap().push_back(response.to_string());
    }

    /// The `(system_prompt, user_prompt)` pairs recorded so far.
    pub fn get_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        self.generate_with_history(system_prompt, &[], user_prompt)
            .await
    }

    async fn generate_with_history(
        &self,
        system_prompt: &str,
        _history: &[ChatMessage],
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| {
                ProviderError::Api(format!(
                    "MockAiProvider: script exhausted, no response for prompt '{user_prompt}'"
                ))
            })
    }
}

// --- Mock Embedder ---

/// A deterministic embedding backend: the same input always yields the same
/// small vector, derived from the input bytes so distinct texts usually get
/// distinct directions.
#[derive(Clone, Debug, Default)]
pub struct MockEmbedder;

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let mut v = [1.0f32; 4];
        for (i, byte) in input.bytes().enumerate() {
            v[i % 4] += byte as f32 / 255.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        Ok(v.iter().map(|x| x / norm).collect())
    }
}

/// An embedding backend that always fails, for exercising backend-failure
/// paths during an index build.
#[derive(Clone, Debug, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _input: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Api(
            "FailingEmbedder: embedding backend unavailable".to_string(),
        ))
    }
}
