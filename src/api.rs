//! LLM transports with exponential backoff retry logic.
//!
//! Two interchangeable backends produce the sentiment summary:
//! - [`XaiClient`]: hosted OpenAI-style chat completions, one user message
//! - [`OllamaClient`]: local Ollama chat endpoint, system + user message
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait, `(prompt, text) -> reply`
//! - [`RetryAsk`]: decorator adding retry logic to any `AskAsync` implementation
//! - [`Backend`]: the configured choice of transport
//!
//! Failures never escape [`Backend::analyze`]; each transport renders its own
//! bracketed error marker so the analysis file is still written.
//!
//! # Retry Strategy
//!
//! - Retries only transient failures (connect/timeout errors and HTTP 5xx/429)
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::config::AppConfig;
use once_cell::sync::Lazy;
use rand::{Rng, rng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::utils::truncate_for_log;

/// Why a model call failed.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("XAI_API_KEY not set")]
    MissingApiKey,
    #[error("response had no message content")]
    EmptyResponse,
}

impl ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Request(e) => e.is_timeout() || e.is_connect(),
            ApiError::Status(code) => *code >= 500 || *code == 429,
            ApiError::MissingApiKey | ApiError::EmptyResponse => false,
        }
    }
}

/// Trait for async LLM interaction.
///
/// Implementors send an instruction prompt together with the article text
/// and return the model's reply.
pub trait AskAsync {
    async fn ask(&self, prompt: &str, text: &str) -> Result<String, ApiError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// The delay between retries follows:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The underlying LLM client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, prompt: &str, text: &str) -> Result<String, ApiError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(prompt, text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries || !e.is_retryable() {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "ask() giving up"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
}

fn http_client(timeout: StdDuration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Hosted chat-completion transport.
pub struct XaiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl fmt::Debug for XaiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XaiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl XaiClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: StdDuration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }
}

impl AskAsync for XaiClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, prompt: &str, text: &str) -> Result<String, ApiError> {
        let key = self.api_key.as_deref().ok_or(ApiError::MissingApiKey)?;
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage::new("user", format!("{prompt}\n\n{text}"))],
            stream: None,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status().as_u16()));
        }
        let parsed: CompletionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ApiError::EmptyResponse)
    }
}

const OLLAMA_SYSTEM_MESSAGE: &str = "你是一個專業的股市情緒分析師。請使用繁體中文回答，並使用台灣常用的金融術語。\n\n請專注於分析PTT股市討論文章的情緒和內容，不要提供即時股價資訊。";

static BLOCK_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"【日期】(\d+)/(\d+[/-]\d+)").unwrap());

/// Hint naming the day the first article block was posted, or empty.
pub fn date_context(text: &str) -> String {
    match BLOCK_DATE.captures(text) {
        Some(caps) => format!(
            "\n\n這些文章來自 {}/{}，請基於當時的市場環境進行分析。請勿嘗試提供即時股價數據，而是專注於分析文章內容。且使用繁體中文回覆，千萬不要出現殘體中文",
            &caps[1], &caps[2]
        ),
        None => String::new(),
    }
}

/// Local Ollama chat transport (non-streaming).
#[derive(Debug)]
pub struct OllamaClient {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(url: &str, model: &str, timeout: StdDuration) -> Self {
        Self {
            client: http_client(timeout),
            api_url: format!("{}/api/chat", url.trim_end_matches('/')),
            model: model.to_string(),
        }
    }
}

impl AskAsync for OllamaClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, prompt: &str, text: &str) -> Result<String, ApiError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage::new("system", OLLAMA_SYSTEM_MESSAGE.to_string()),
                ChatMessage::new("user", format!("{prompt}{}\n\n{text}", date_context(text))),
            ],
            stream: Some(false),
        };

        let resp = self.client.post(&self.api_url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status().as_u16()));
        }
        let parsed: OllamaResponse = resp.json().await?;
        Ok(parsed.message.content)
    }
}

/// Which transport produces the analysis.
#[derive(Debug)]
pub enum Backend {
    Xai(RetryAsk<XaiClient>),
    Ollama(RetryAsk<OllamaClient>),
}

impl Backend {
    pub fn xai(config: &AppConfig, api_key: Option<String>) -> Self {
        let client = XaiClient::new(
            &config.xai.base_url,
            &config.xai.model,
            api_key,
            config.request_timeout(),
        );
        Backend::Xai(RetryAsk::new(client, config.xai.max_retries, StdDuration::from_secs(1)))
    }

    pub fn ollama(config: &AppConfig) -> Self {
        let client = OllamaClient::new(
            &config.ollama.url,
            &config.ollama.model,
            config.request_timeout(),
        );
        Backend::Ollama(RetryAsk::new(
            client,
            config.ollama.max_retries,
            StdDuration::from_secs(1),
        ))
    }

    pub fn model(&self) -> &str {
        match self {
            Backend::Xai(c) => &c.inner().model,
            Backend::Ollama(c) => &c.inner().model,
        }
    }

    /// Heading label and file-name suffix distinguishing this backend's output.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Backend::Xai(_) => None,
            Backend::Ollama(_) => Some("Ollama"),
        }
    }

    fn error_marker(&self, err: &ApiError) -> String {
        match (self, err) {
            (Backend::Xai(_), e) => format!("[xAI API error: {e}]"),
            (Backend::Ollama(_), ApiError::Status(code)) => {
                format!("[Ollama API error: HTTP {code}]")
            }
            (Backend::Ollama(_), ApiError::Request(e)) if e.is_connect() => "[Error: Ollama not running. Install with 'brew install ollama' and run 'ollama serve']".to_string(),
            (Backend::Ollama(_), e) => format!("[Error calling Ollama API: {e}]"),
        }
    }

    /// Run the model; on failure return the transport's error marker instead.
    #[instrument(level = "info", skip_all, fields(model = %self.model()))]
    pub async fn analyze(&self, prompt: &str, text: &str) -> String {
        info!(
            prompt_chars = prompt.chars().count(),
            content_chars = text.chars().count(),
            "Starting analysis"
        );
        let t0 = Instant::now();
        let res = match self {
            Backend::Xai(c) => c.ask(prompt, text).await,
            Backend::Ollama(c) => c.ask(prompt, text).await,
        };
        let dt = t0.elapsed();

        match res {
            Ok(reply) => {
                info!(elapsed_ms_total = dt.as_millis(), "Analysis complete");
                debug!(preview = %truncate_for_log(&reply, 200), "Model reply");
                reply
            }
            Err(e) => {
                let marker = self.error_marker(&e);
                error!(elapsed_ms_total = dt.as_millis(), error = %e, "Analysis failed");
                marker
            }
        }
    }
}
