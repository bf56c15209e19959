//! # Application State
//!
//! Defines the shared application state and the logic for building it at
//! startup: the AI and embedding providers, the single rate-limited model
//! gateway, the SQLite-backed stores, the knowledge base, and the chat
//! engine serving user turns.

use crate::{config::AppConfig, telegram::TelegramClient};
use anyhow::{anyhow, Result};
use catalograg::{
    engine::ChatEngine,
    gateway::{ModelGateway, RateLimiter},
    history::SqliteHistoryStore,
    install::KbPaths,
    prompt::SqlitePromptStore,
    prompts::INITIAL_SYSTEM_PROMPT,
    providers::ai::{gemini::GeminiProvider, local::LocalAiProvider, AiProvider, HttpEmbedder},
    KnowledgeBase, KnowledgeService, SqliteProvider,
};
use std::sync::Arc;

/// The shared application state, accessible from all update handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub telegram: TelegramClient,
    pub kb: Arc<KnowledgeBase>,
    pub service: Arc<dyn KnowledgeService>,
}

/// Instantiates the configured generation provider.
fn build_ai_provider(config: &AppConfig) -> Result<Arc<dyn AiProvider>> {
    let provider = &config.provider;
    let ai: Arc<dyn AiProvider> = match provider.provider.as_str() {
        "gemini" => {
            let api_key = provider
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("api_key is required for the gemini provider"))?;
            // If api_url is not provided in config, construct it from the model name.
            let api_url = provider.api_url.clone().unwrap_or_else(|| {
                format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                    provider.model_name
                )
            });
            Arc::new(GeminiProvider::new(api_url, api_key)?)
        }
        "local" => {
            let api_url = provider
                .api_url
                .clone()
                .ok_or_else(|| anyhow!("api_url is required for the local provider"))?;
            Arc::new(LocalAiProvider::new(
                api_url,
                provider.api_key.clone(),
                Some(provider.model_name.clone()),
            )?)
        }
        other => return Err(anyhow!("Unsupported AI provider: {other}")),
    };
    Ok(ai)
}

/// Builds the shared application state from the configuration.
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    let telegram = TelegramClient::new(config.telegram_token.clone())?;

    let ai = build_ai_provider(&config)?;
    let embedder = Arc::new(HttpEmbedder::new(
        config.embedding.api_url.clone(),
        config.embedding.model_name.clone(),
        config.embedding.api_key.clone(),
    )?);

    // One limiter and one gateway for the whole process, so the backend call
    // budget applies across updates and index builds alike.
    let limiter = Arc::new(RateLimiter::new(config.calls_per_minute));
    let gateway = Arc::new(ModelGateway::new(ai, embedder, limiter));

    let paths = KbPaths {
        index_dir: config.paths.index_dir.clone(),
        scratch_dir: config.paths.scratch_dir.clone(),
        catalogue_path: config.paths.catalogue_path.clone(),
    };
    let kb = Arc::new(KnowledgeBase::new(
        paths,
        gateway.clone(),
        config.max_catalogue_size_mb,
    ));

    if let Some(parent) = std::path::Path::new(&config.db_url).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.paths.upload_dir)?;
    let sqlite = SqliteProvider::new(&config.db_url).await?;
    sqlite.initialize_schema().await?;

    let history = Arc::new(SqliteHistoryStore::new(sqlite.clone()));
    let prompt_store = Arc::new(SqlitePromptStore::new(sqlite, INITIAL_SYSTEM_PROMPT));
    let engine = ChatEngine::new(kb.clone(), gateway, history, prompt_store).await?;

    Ok(AppState {
        config: Arc::new(config),
        telegram,
        kb,
        service: Arc::new(engine),
    })
}
