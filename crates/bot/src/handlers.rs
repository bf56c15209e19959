//! # Update Handlers
//!
//! Routes incoming Telegram updates: administrative commands, catalogue
//! uploads, and plain chat messages. Every durable per-user conversation is
//! keyed by a UUID derived from the Telegram user id, so the chat pipeline
//! never sees raw transport identifiers.

use crate::{
    state::AppState,
    telegram::{Document, Message, Update},
};
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const TYPING_REFRESH: Duration = Duration::from_secs(4);

const START_MESSAGE: &str = "Hello! Ask me anything about the product catalogue. \
Administrators can upload a new catalogue CSV to refresh my knowledge.";

const APOLOGY_MESSAGE: &str =
    "Sorry, something went wrong while preparing your answer. Please try again.";

/// Derives the durable conversation key for a Telegram user.
fn session_key(user_id: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_DNS,
        format!("telegram-user-{user_id}").as_bytes(),
    )
    .to_string()
}

fn is_admin(state: &AppState, user_id: i64) -> bool {
    state.config.admin_ids.contains(&user_id)
}

/// Entry point for one update. Errors are logged here so a bad update never
/// takes down the polling loop.
pub async fn handle_update(state: AppState, update: Update) {
    let Some(message) = update.message else {
        return;
    };
    if let Err(e) = dispatch_message(&state, message).await {
        error!("failed to handle update {}: {e:#}", update.update_id);
    }
}

async fn dispatch_message(state: &AppState, message: Message) -> Result<()> {
    let chat_id = message.chat.id;
    let Some(user) = message.from.clone() else {
        return Ok(());
    };

    if let Some(document) = message.document.clone() {
        return handle_catalogue_upload(state, chat_id, user.id, document).await;
    }

    let Some(text) = message.text.clone() else {
        return Ok(());
    };
    let text = text.trim().to_string();

    match text.split_whitespace().next() {
        Some("/start") => state.telegram.send_message(chat_id, START_MESSAGE).await,
        Some("/status") => handle_status(state, chat_id).await,
        Some("/clear_history") => handle_clear_history(state, chat_id, user.id).await,
        Some("/change_prompt") => {
            let new_prompt = text.trim_start_matches("/change_prompt").trim();
            handle_change_prompt(state, chat_id, user.id, new_prompt).await
        }
        Some(command) if command.starts_with('/') => {
            state
                .telegram
                .send_message(chat_id, "Unknown command.")
                .await
        }
        Some(_) => handle_chat(state, chat_id, user.id, &text).await,
        None => Ok(()),
    }
}

async fn handle_status(state: &AppState, chat_id: i64) -> Result<()> {
    let reply = match state.kb.status().await {
        Some(metadata) => format!(
            "Knowledge base: {} rows.\nBuilt at: {}\nCatalogue modified: {}\nChecksum: {}",
            metadata.row_count,
            metadata.built_at.format("%Y-%m-%d %H:%M:%S UTC"),
            metadata.catalogue_mtime.format("%Y-%m-%d %H:%M:%S UTC"),
            metadata.content_checksum,
        ),
        None => "No knowledge base has been installed yet.".to_string(),
    };
    state.telegram.send_message(chat_id, &reply).await
}

async fn handle_clear_history(state: &AppState, chat_id: i64, user_id: i64) -> Result<()> {
    state.service.clear_history(&session_key(user_id)).await?;
    info!(user_id, "conversation history cleared");
    state
        .telegram
        .send_message(chat_id, "Your conversation history has been cleared.")
        .await
}

async fn handle_change_prompt(
    state: &AppState,
    chat_id: i64,
    user_id: i64,
    new_prompt: &str,
) -> Result<()> {
    if !is_admin(state, user_id) {
        warn!(user_id, "non-admin attempted /change_prompt");
        return state
            .telegram
            .send_message(chat_id, "This command is restricted to administrators.")
            .await;
    }

    let accepted = state.service.update_prompt(new_prompt).await?;
    let reply = if accepted {
        "System prompt updated."
    } else {
        "The prompt was rejected: it must contain some text."
    };
    state.telegram.send_message(chat_id, reply).await
}

/// Saves an uploaded catalogue file and runs the full update pipeline.
async fn handle_catalogue_upload(
    state: &AppState,
    chat_id: i64,
    user_id: i64,
    document: Document,
) -> Result<()> {
    if !is_admin(state, user_id) {
        warn!(user_id, "non-admin attempted a catalogue upload");
        return state
            .telegram
            .send_message(chat_id, "Only administrators may upload a new catalogue.")
            .await;
    }

    let max_bytes = state.config.max_catalogue_size_mb * 1024 * 1024;
    if document.file_size.unwrap_or(0) as u64 > max_bytes {
        return state
            .telegram
            .send_message(
                chat_id,
                &format!(
                    "The file is too large. The maximum catalogue size is {} MB.",
                    state.config.max_catalogue_size_mb
                ),
            )
            .await;
    }

    state
        .telegram
        .send_message(chat_id, "Catalogue received, updating the knowledge base…")
        .await?;

    let file_name = document
        .file_name
        .clone()
        .unwrap_or_else(|| "catalogue.csv".to_string());
    let saved_path = state
        .config
        .paths
        .upload_dir
        .join(format!("{}_{file_name}", Utc::now().timestamp()));

    let bytes = state.telegram.download_document(&document.file_id).await?;
    tokio::fs::write(&saved_path, &bytes)
        .await
        .map_err(|e| anyhow!("failed to save upload to {}: {e}", saved_path.display()))?;
    info!(path = %saved_path.display(), bytes = bytes.len(), "catalogue upload saved");

    let report = state.kb.update(&saved_path).await;
    state.telegram.send_message(chat_id, &report.message).await
}

/// Runs one chat turn, keeping the "typing…" indicator alive while the
/// pipeline works.
async fn handle_chat(state: &AppState, chat_id: i64, user_id: i64, text: &str) -> Result<()> {
    let key = session_key(user_id);
    let service = state.service.clone();
    let query = text.to_string();
    let mut worker = tokio::spawn(async move { service.process_query(&query, &key).await });

    let outcome = loop {
        if let Err(e) = state.telegram.send_typing_action(chat_id).await {
            warn!("failed to send typing action: {e}");
        }
        tokio::select! {
            result = &mut worker => break result,
            _ = tokio::time::sleep(TYPING_REFRESH) => {}
        }
    };

    match outcome {
        Ok(Ok(answer)) => state.telegram.send_message(chat_id, &answer).await,
        Ok(Err(e)) => {
            error!(user_id, "chat turn failed: {e}");
            state.telegram.send_message(chat_id, APOLOGY_MESSAGE).await
        }
        Err(join_error) => {
            error!(user_id, "chat worker panicked: {join_error}");
            state.telegram.send_message(chat_id, APOLOGY_MESSAGE).await
        }
    }
}
