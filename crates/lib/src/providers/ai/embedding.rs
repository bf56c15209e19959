//! # Embeddings Provider
//!
//! Generates vector embeddings by calling an external embeddings API. The
//! HTTP implementation speaks both the OpenAI-compatible and the Gemini wire
//! shapes, selected by the configured API URL.

use crate::errors::ProviderError;
use async_trait::async_trait;
use dyn_clone::DynClone;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

/// The embedding capability required by the index builder and chat engine.
#[async_trait]
pub trait Embedder: Send + Sync + Debug + DynClone {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError>;
}

dyn_clone::clone_trait_object!(Embedder);

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize, Debug)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

// --- Gemini-specific request and response structures ---

#[derive(Serialize, Debug)]
struct GeminiEmbeddingRequest<'a> {
    model: String,
    content: GeminiEmbeddingContent<'a>,
}

#[derive(Serialize, Debug)]
struct GeminiEmbeddingContent<'a> {
    parts: Vec<GeminiEmbeddingPart<'a>>,
}

#[derive(Serialize, Debug)]
struct GeminiEmbeddingPart<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct GeminiEmbeddingResponse {
    embedding: GeminiEmbeddingValue,
}

#[derive(Deserialize, Debug)]
struct GeminiEmbeddingValue {
    values: Vec<f32>,
}

/// An [`Embedder`] backed by an external HTTP embeddings endpoint.
#[derive(Clone, Debug)]
pub struct HttpEmbedder {
    client: ReqwestClient,
    api_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        api_url: String,
        model: String,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(ProviderError::ClientBuild)?;
        Ok(Self {
            client,
            api_url,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let mut request_builder = self.client.post(&self.api_url);
        let is_gemini = self.api_url.contains("generativelanguage.googleapis.com");

        if is_gemini {
            // Gemini requires the model name to be prefixed with "models/".
            let gemini_model_name = if self.model.starts_with("models/") {
                self.model.clone()
            } else {
                format!("models/{}", self.model)
            };
            let request_body = GeminiEmbeddingRequest {
                model: gemini_model_name,
                content: GeminiEmbeddingContent {
                    parts: vec![GeminiEmbeddingPart { text: input }],
                },
            };
            debug!(payload = ?request_body, "--> Sending request to Gemini Embeddings API");
            request_builder = request_builder.json(&request_body);
            if let Some(key) = &self.api_key {
                request_builder = request_builder.header("x-goog-api-key", key);
            }
        } else {
            let request_body = OpenAiEmbeddingRequest {
                model: &self.model,
                input,
            };
            debug!(payload = ?request_body, "--> Sending request to OpenAI-compatible Embeddings API");
            request_builder = request_builder.json(&request_body);
            if let Some(key) = &self.api_key {
                request_builder = request_builder.bearer_auth(key);
            }
        }

        let response = request_builder
            .send()
            .await
            .map_err(ProviderError::Request)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(error_text));
        }

        if is_gemini {
            let gemini_response: GeminiEmbeddingResponse = response
                .json()
                .await
                .map_err(ProviderError::Deserialization)?;
            Ok(gemini_response.embedding.values)
        } else {
            let openai_response: OpenAiEmbeddingResponse = response
                .json()
                .await
                .map_err(ProviderError::Deserialization)?;
            openai_response
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| {
                    ProviderError::Api(
                        "OpenAI-compatible API returned no embeddings".to_string(),
                    )
                })
        }
    }
}
