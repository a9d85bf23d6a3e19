//! Runtime configuration loaded from an optional YAML file.
//!
//! Every section falls back to defaults that target the live PTT Stock board
//! and the stock model endpoints, so running without a config file works.
//! Command-line flags are applied on top by [`crate::cli`].

use crate::error::Result;
use crate::scrapers::clean::DEFAULT_MAX_LENGTH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub board: BoardConfig,
    pub xai: XaiConfig,
    pub ollama: OllamaConfig,
    pub paths: PathsConfig,
    /// Upper bound for a single model invocation, in seconds.
    pub request_timeout_secs: u64,
}

/// Where and how to crawl the board.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BoardConfig {
    pub base_url: String,
    pub index_path: String,
    pub user_agent: String,
    /// Sent verbatim as the `Cookie` header; the board gates content behind it.
    pub cookie: String,
    pub max_pages: usize,
    pub page_delay_ms: u64,
    pub max_content_length: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.ptt.cc".to_string(),
            index_path: "/bbs/stock/index.html".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            cookie: "over18=1".to_string(),
            max_pages: 20,
            page_delay_ms: 1000,
            max_content_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl BoardConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

/// Hosted chat-completion backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct XaiConfig {
    pub base_url: String,
    pub model: String,
    pub max_retries: usize,
}

impl Default for XaiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.x.ai/v1".to_string(),
            model: "grok-3-beta".to_string(),
            max_retries: 3,
        }
    }
}

/// Local Ollama chat endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub max_retries: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "gpt-oss:20b".to_string(),
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory the scraper writes to and the analyzer searches.
    pub articles_dir: PathBuf,
    pub analysis_dir: PathBuf,
    pub prompt_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            articles_dir: PathBuf::from("."),
            analysis_dir: PathBuf::from("analysis"),
            prompt_file: PathBuf::from("xai_stock_sentiment_prompt.txt"),
        }
    }
}

impl AppConfig {
    /// Load from `path` when given, otherwise use defaults.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let config: AppConfig = serde_yaml::from_str(&raw)?;
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            None => AppConfig::default(),
        };
        if config.request_timeout_secs == 0 {
            config.request_timeout_secs = 300;
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
