//! # Telegram Bot API Client
//!
//! A minimal long-polling client over the HTTP Bot API: receiving updates,
//! sending messages and chat actions, and downloading uploaded documents.

use anyhow::{anyhow, Context, Result};
use reqwest::Client as ReqwestClient;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.telegram.org";

// --- Bot API payload structures ---

#[derive(Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub document: Option<Document>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Chat {
    pub id: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TelegramFile {
    pub file_path: Option<String>,
}

/// A client for one bot token.
#[derive(Clone, Debug)]
pub struct TelegramClient {
    client: ReqwestClient,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Result<Self> {
        let client = ReqwestClient::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, token })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.token)
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("request to '{method}' failed"))?;
        let api_response: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("invalid response from '{method}'"))?;
        if !api_response.ok {
            return Err(anyhow!(
                "'{method}' returned an error: {}",
                api_response.description.unwrap_or_default()
            ));
        }
        api_response
            .result
            .ok_or_else(|| anyhow!("'{method}' returned ok without a result"))
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    /// Sends a text message, preferring Markdown and falling back to plain
    /// text when Telegram rejects the formatting.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let markdown = self
            .call::<Message>(
                "sendMessage",
                json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" }),
            )
            .await;
        if let Err(e) = markdown {
            warn!("Markdown send failed ({e}), retrying as plain text");
            self.call::<Message>(
                "sendMessage",
                json!({ "chat_id": chat_id, "text": text }),
            )
            .await?;
        }
        Ok(())
    }

    /// Shows the "typing…" indicator in a chat.
    pub async fn send_typing_action(&self, chat_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "sendChatAction",
                json!({ "chat_id": chat_id, "action": "typing" }),
            )
            .await?;
        Ok(())
    }

    /// Downloads the content of an uploaded document.
    pub async fn download_document(&self, file_id: &str) -> Result<Vec<u8>> {
        let file: TelegramFile = self.call("getFile", json!({ "file_id": file_id })).await?;
        let file_path = file
            .file_path
            .ok_or_else(|| anyhow!("getFile returned no file_path"))?;
        let url = format!("{API_BASE}/file/bot{}/{file_path}", self.token);
        debug!(file_path, "downloading document");
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .context("document download failed")?
            .error_for_status()
            .context("document download returned an error status")?
            .bytes()
            .await
            .context("failed to read document body")?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_document_update() {
        let raw = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": { "id": 42, "first_name": "Ann", "username": "ann" },
                "chat": { "id": 42 },
                "document": { "file_id": "abc", "file_name": "catalogue.csv", "file_size": 123 }
            }
        });
        let update: Update = serde_json::from_value(raw).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 42);
        let document = message.document.unwrap();
        assert_eq!(document.file_name.as_deref(), Some("catalogue.csv"));
    }

    #[test]
    fn parses_an_error_response() {
        let raw = r#"{"ok": false, "description": "Bad Request"}"#;
        let response: ApiResponse<Message> = serde_json::from_str(raw).unwrap();
        assert!(!response.ok);
        assert_eq!(response.description.as_deref(), Some("Bad Request"));
    }
}
