//! # Language model client
//!
//! An OpenAI-compatible chat-completions client pointed at Groq. Requests are
//! made with temperature 0 and, by default, `stream: true`; the SSE stream is
//! accumulated into the full answer before it is returned, so callers never
//! see partial output.
//!
//! ## Retries
//!
//! Network errors, HTTP 429 and 5xx are retried up to `llm.max_retries` times
//! after the first attempt, sleeping `retry_backoff_ms`, then twice that, and
//! so on (capped at 2^5 times the base). Any other 4xx fails at once.
//!
//! The [`ChatModel`] trait is the seam the rest of the crate depends on;
//! tests substitute scripted implementations.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

/// Environment variable holding the Groq API key.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";
/// Optional override of `llm.base_url`.
pub const BASE_URL_ENV: &str = "GROQ_BASE_URL";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API key not found. Set {env_var} environment variable")]
    MissingApiKey { env_var: String },
    #[error("Network error: {message}")]
    Network { message: String },
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {message}")]
    Parse { message: String },
    #[error("Language model unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<LlmError> },
}

impl LlmError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Network { .. } => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// A chat model that turns a message list into one complete reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

// ============ Wire types ============

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

// ============ SSE accumulation ============

/// Collects `choices[0].delta.content` from an SSE byte stream. Network
/// chunks may split lines anywhere, so bytes are buffered until a newline.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    pending: Vec<u8>,
    content: String,
    done: bool,
}

impl SseAccumulator {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line));
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Flush any unterminated final line and return the accumulated text.
    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(&String::from_utf8_lossy(&line));
        }
        self.content
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        if self.done {
            return;
        }
        match serde_json::from_str::<StreamResponse>(data) {
            Ok(event) => {
                if let Some(content) = event.choices.first().and_then(|c| c.delta.content.as_ref())
                {
                    self.content.push_str(content);
                }
            }
            Err(e) => tracing::debug!(error = %e, "ignoring unparseable SSE event"),
        }
    }
}

// ============ Groq client ============

pub struct GroqClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    stream: bool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl GroqClient {
    /// Build a client from config, reading the key from `GROQ_API_KEY` and
    /// the base URL override from `GROQ_BASE_URL`.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(API_KEY_ENV).ok();
        let mut config = config.clone();
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.base_url = url;
            }
        }
        Self::with_api_key(&config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: Option<String>) -> Result<Self, LlmError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingApiKey {
                env_var: API_KEY_ENV.to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Network {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            stream: config.stream,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    async fn send_once(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: self.stream,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| excerpt(&error_text, MAX_BODY_EXCERPT).to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if self.stream {
            read_stream(response).await
        } else {
            read_body(response, &self.model).await
        }
    }
}

async fn read_stream(response: reqwest::Response) -> Result<String, LlmError> {
    let mut acc = SseAccumulator::default();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| LlmError::Network {
            message: format!("Stream error: {}", e),
        })?;
        acc.push(&chunk);
        if acc.is_done() {
            break;
        }
    }

    Ok(acc.finish())
}

const MAX_BODY_EXCERPT: usize = 500;

/// At most `max_chars` characters of `text`, cut on a char boundary.
fn excerpt(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(i, _)| &text[..i])
}

async fn read_body(response: reqwest::Response, model: &str) -> Result<String, LlmError> {
    let text = response.text().await.map_err(|e| LlmError::Network {
        message: format!("Failed to read response body: {}", e),
    })?;

    let parsed: CompletionResponse = serde_json::from_str(&text).map_err(|e| LlmError::Parse {
        message: format!(
            "Failed to parse completion: {}. Body: {}",
            e,
            excerpt(&text, MAX_BODY_EXCERPT)
        ),
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::Parse {
            message: format!("No response content from model '{}'", model),
        })
}

#[async_trait]
impl ChatModel for GroqClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_backoff * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.send_once(messages).await {
                Ok(answer) => return Ok(answer),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        error = %e,
                        "transient language model error"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(LlmError::Exhausted {
            attempts: self.max_retries + 1,
            last: Box::new(last_err.unwrap_or(LlmError::Network {
                message: "no attempt was made".to_string(),
            })),
        })
    }
}
