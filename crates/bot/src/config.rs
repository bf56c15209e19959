//! # Application Configuration
//!
//! Defines the configuration structure for the bot and the logic for loading
//! it from a `config.yml` file and environment variables. Values in the YAML
//! file may reference environment variables with `${VAR}` placeholders, which
//! are substituted before parsing.

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use std::{env, fs, path::PathBuf};
use tracing::info;

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// Indicates an error from the underlying `config` crate.
    General(String),
    /// Indicates a required configuration file was not found.
    NotFound(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
            ConfigError::NotFound(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

/// The root configuration structure, mapping directly to `config.yml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The Telegram Bot API token. Loaded from `TELEGRAM_TOKEN` env var.
    pub telegram_token: String,
    /// The path to the SQLite database file.
    #[serde(default = "default_db_url")]
    pub db_url: String,
    /// Telegram user ids allowed to run administrative commands.
    #[serde(default)]
    pub admin_ids: Vec<i64>,
    /// Upper bound on an uploaded catalogue file, in megabytes.
    #[serde(default = "default_max_catalogue_size_mb")]
    pub max_catalogue_size_mb: u64,
    /// Process-wide budget of model backend calls per minute.
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: u32,
    /// Long-poll timeout for `getUpdates`, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Filesystem layout of the knowledge base.
    pub paths: PathsConfig,
    /// Configuration for the text embedding model.
    pub embedding: EmbeddingConfig,
    /// Configuration for the generation model.
    pub provider: ProviderConfig,
}

fn default_db_url() -> String {
    "db/catalograg.db".to_string()
}

fn default_max_catalogue_size_mb() -> u64 {
    10
}

fn default_calls_per_minute() -> u32 {
    60
}

fn default_poll_timeout_secs() -> u64 {
    30
}

/// Filesystem locations of the knowledge base artifacts.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub index_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub catalogue_path: PathBuf,
    /// Directory incoming catalogue uploads are saved into before validation.
    pub upload_dir: PathBuf,
}

/// Configuration for the embedding model provider.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub model_name: String,
    pub api_key: Option<String>,
}

/// Configuration for the generation model provider.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// The type of provider (e.g., "gemini", "local").
    pub provider: String,
    /// The API URL. Optional for Gemini where it can be derived.
    pub api_url: Option<String>,
    /// The API key, which can be null for local providers.
    pub api_key: Option<String>,
    pub model_name: String,
}

// Helper to read a file, substitute env vars, and return its content.
// Returns Ok(None) if the file does not exist, or an error if it fails to read.
fn read_and_substitute(path: &str) -> Result<Option<String>, ConfigError> {
    if !std::path::Path::new(path).exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::General(format!("Failed to read config file '{path}': {e}")))?;

    let re = Regex::new(r"\$\{(?P<var>[A-Z0-9_]+)\}").unwrap();
    let expanded_content = re.replace_all(&content, |caps: &regex::Captures| {
        let var_name = &caps["var"];
        env::var(var_name).unwrap_or_else(|_| "".to_string())
    });

    Ok(Some(expanded_content.to_string()))
}

/// Loads the application configuration from a file and environment variables.
///
/// - Top-level keys like `db_url` are overridden by `DB_URL` etc.
/// - Nested keys are overridden by `CATALOGRAG_...` variables
///   (e.g., `CATALOGRAG_EMBEDDING__API_URL`).
pub fn get_config(config_path_override: Option<&str>) -> Result<AppConfig, ConfigError> {
    let base_path = env!("CARGO_MANIFEST_DIR");
    let main_config_path = if let Some(override_path) = config_path_override {
        override_path.to_string()
    } else {
        format!("{base_path}/config.yml")
    };

    let main_content = read_and_substitute(&main_config_path)?.ok_or_else(|| {
        ConfigError::NotFound(format!(
            "Main config file not found at '{main_config_path}'. Please create a 'config.yml'."
        ))
    })?;
    info!("Loading configuration from '{main_config_path}'.");

    let settings = ConfigBuilder::builder()
        .add_source(File::from_str(&main_content, FileFormat::Yaml))
        // Environment variables for top-level keys like TELEGRAM_TOKEN.
        .add_source(Environment::default())
        // Prefixed environment variables for deeper overrides.
        .add_source(
            Environment::with_prefix("CATALOGRAG")
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_minimal_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
telegram_token: "test-token"
admin_ids: [42]
paths:
  index_dir: "data/index"
  scratch_dir: "data/scratch"
  catalogue_path: "data/catalogue.csv"
  upload_dir: "data/uploads"
embedding:
  api_url: "http://localhost:1234/v1/embeddings"
  model_name: "text-embedding"
provider:
  provider: "local"
  api_url: "http://localhost:1234/v1/chat/completions"
  model_name: "test-model"
"#
        )
        .unwrap();

        let config = get_config(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.telegram_token, "test-token");
        assert_eq!(config.admin_ids, vec![42]);
        assert_eq!(config.max_catalogue_size_mb, 10);
        assert_eq!(config.calls_per_minute, 60);
        assert_eq!(config.provider.provider, "local");
    }
}
