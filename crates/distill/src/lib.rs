//! Hierarchical map-reduce summarization for text that exceeds a model's
//! context window.
//!
//! `distill` takes an arbitrarily large body of text (transcripts, papers,
//! logs) and produces a summary that fits a caller-chosen token budget. It
//! splits the text into context-sized segments, summarizes them concurrently,
//! concatenates the partial summaries in source order, and repeats on the
//! result until it fits one final synthesis call. Each level must measurably
//! shrink the text or the run fails fast instead of looping.
//!
//! # Getting started
//!
//! ```ignore
//! use distill::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api_key = std::env::var("OPENROUTER_KEY")?;
//!     let client = ChatClient::new(api_key)?;
//!     let generator = ChatGenerator::new(client, DEFAULT_MODEL);
//!
//!     let config = RunConfig::new(8_000, 500)
//!         .with_overlap_tokens(100)
//!         .with_max_concurrency(8);
//!
//!     let text = std::fs::read_to_string("transcript.txt")?;
//!     let result = Summarizer::new(&generator, config)
//!         .with_event_handler(&LoggingHandler)
//!         .run(&text)
//!         .await?;
//!
//!     println!("{}", result.summary);
//!     println!("{} levels, {:.1}% of original", result.levels, result.compression_ratio * 100.0);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Run a summarization:** [`Summarizer`](engine::Summarizer) is the run
//!   controller; configure it with [`RunConfig`](engine::RunConfig).
//! - **Plug in a model:** implement [`Generator`](api::Generator), or use
//!   [`ChatGenerator`](api::ChatGenerator) for OpenAI-compatible endpoints
//!   and [`FnGenerator`](api::FnGenerator) for closures.
//! - **Change how tokens are counted:** implement
//!   [`TokenEstimator`](text::TokenEstimator) and pass it via
//!   [`Summarizer::with_estimator`](engine::Summarizer::with_estimator).
//! - **Observe progress:** implement
//!   [`EventHandler`](engine::EventHandler); [`LoggingHandler`](engine::LoggingHandler)
//!   reports through `tracing`.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`engine`] | Run controller, chunk planner, map stage, level reducer, statistics, errors |
//! | [`text`] | Token estimators and immutable tokenized text |
//! | [`api`] | [`Generator`](api::Generator) trait, chat-backed generator, retry with backoff |

pub mod api;
pub mod engine;
pub mod prelude;
pub mod text;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

/// Default chat-completions endpoint (OpenRouter, OpenAI-compatible).
pub const DEFAULT_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for generation calls.
pub const DEFAULT_MODEL: &str = "qwen/qwen-2.5-7b-instruct";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    pub temperature: f32,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from [`ChatClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions API.
///
/// Errors are returned as strings prefixed with `HTTP <status>` or
/// `request failed:` so [`GenerateError::classify`](api::GenerateError::classify)
/// can sort them into transient and permanent failures.
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl ChatClient {
    /// Create a client for the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_url(api_key, DEFAULT_CHAT_URL)
    }

    /// Create a client for a custom endpoint (vLLM, LiteLLM, Ollama's
    /// OpenAI-compatible route, ...).
    pub fn with_url(api_key: impl Into<String>, url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("distill/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let mut request = self.client.post(&self.url).json(body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let resp = request
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("request failed: could not read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("chat API HTTP {}: {text}", status.as_u16()));
        }

        parse_completion(&text)
    }
}

/// Parse a successful chat-completions response body.
fn parse_completion(text: &str) -> Result<ChatCompletion, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| format!("invalid response body: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(format!("chat API error: {}", err.message));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    let choice = parsed.choices.and_then(|c| c.into_iter().next());
    Ok(match choice {
        Some(c) => ChatCompletion {
            content: c.message.content,
            usage: parsed.usage,
            finish_reason: c.finish_reason,
        },
        None => ChatCompletion {
            content: None,
            usage: parsed.usage,
            finish_reason: None,
        },
    })
}
