//! The text-generation collaborator.
//!
//! The engine never talks to a model directly. Every call goes through the
//! [`Generator`] trait: a prompt plus an output-token hint in, generated text
//! out. Failures are split into [`GenerateError::Transient`] (retried with
//! backoff) and [`GenerateError::Permanent`] (recorded immediately).
//!
//! Two implementations ship with the crate:
//!
//! - [`ChatGenerator`]: backed by an OpenAI-compatible chat-completions API
//!   via [`ChatClient`](crate::ChatClient).
//! - [`FnGenerator`]: wraps an async closure; for embedding and tests.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use super::retry::{is_permanent_error, is_transient_error};
use crate::{ChatClient, ChatCompletion, ChatRequest, Message};

/// Boxed future returned by [`Generator::generate`].
pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<Generation, GenerateError>> + Send + 'a>>;

/// Text produced by one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    /// Output token count as reported by the collaborator, if any. The
    /// engine re-measures with its own estimator for budget decisions.
    pub tokens: Option<usize>,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

/// Failure category of a generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Transient,
    Permanent,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error returned by a [`Generator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    /// Network failure, timeout, or rate limit. Worth retrying.
    #[error("transient generation error: {0}")]
    Transient(String),
    /// The request itself is unacceptable. Retrying cannot help.
    #[error("permanent generation error: {0}")]
    Permanent(String),
}

impl GenerateError {
    /// Classify a free-form error message (e.g. from an HTTP client).
    ///
    /// Unrecognized messages are treated as permanent so a misbehaving
    /// backend cannot keep a segment in a retry loop.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_transient_error(&message) && !is_permanent_error(&message) {
            GenerateError::Transient(message)
        } else {
            GenerateError::Permanent(message)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerateError::Transient(_) => ErrorKind::Transient,
            GenerateError::Permanent(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GenerateError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            GenerateError::Transient(m) | GenerateError::Permanent(m) => m,
        }
    }
}

/// A text-generation backend.
///
/// Implementors must be safe to call concurrently: the map stage issues
/// several calls at once, bounded by the run's concurrency limit.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Generator for Echo {
///     fn generate(&self, prompt: &str, _max_output_tokens: usize) -> GenerateFuture<'_> {
///         let prompt = prompt.to_string();
///         Box::pin(async move { Ok(Generation::new(prompt)) })
///     }
/// }
/// ```
pub trait Generator: Send + Sync {
    /// Generate text for `prompt`, aiming for at most `max_output_tokens`.
    fn generate(&self, prompt: &str, max_output_tokens: usize) -> GenerateFuture<'_>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, prompt: &str, max_output_tokens: usize) -> GenerateFuture<'_> {
        (**self).generate(prompt, max_output_tokens)
    }
}

// ── FnGenerator ────────────────────────────────────────────────────

/// Type-erased async handler for [`FnGenerator`].
type ErasedGenerateHandler = Box<
    dyn Fn(String, usize) -> Pin<Box<dyn Future<Output = Result<Generation, GenerateError>> + Send>>
        + Send
        + Sync,
>;

/// A closure-backed generator.
///
/// # Example
///
/// ```ignore
/// let generator = FnGenerator::new(|prompt: String, max_tokens: usize| async move {
///     let words: Vec<&str> = prompt.split_whitespace().take(max_tokens).collect();
///     Ok(Generation::new(words.join(" ")))
/// });
/// ```
pub struct FnGenerator {
    handler: ErasedGenerateHandler,
}

impl FnGenerator {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Generation, GenerateError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |prompt, max| Box::pin(handler(prompt, max))),
        }
    }
}

impl Generator for FnGenerator {
    fn generate(&self, prompt: &str, max_output_tokens: usize) -> GenerateFuture<'_> {
        (self.handler)(prompt.to_string(), max_output_tokens)
    }
}

// ── ChatGenerator ──────────────────────────────────────────────────

/// System message sent with every chat-backed generation call.
const SYSTEM_PROMPT: &str = "You are a precise summarizer. Preserve facts, names, numbers, \
and conclusions. Never invent information that is not in the provided text.";

/// A [`Generator`] backed by an OpenAI-compatible chat-completions endpoint.
pub struct ChatGenerator {
    client: ChatClient,
    model: String,
    temperature: f32,
}

impl ChatGenerator {
    pub fn new(client: ChatClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: 0.3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, prompt: &str, max_output_tokens: usize) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
            max_tokens: u32::try_from(max_output_tokens).unwrap_or(u32::MAX),
            temperature: self.temperature,
        }
    }
}

impl Generator for ChatGenerator {
    fn generate(&self, prompt: &str, max_output_tokens: usize) -> GenerateFuture<'_> {
        let body = self.request(prompt, max_output_tokens);
        Box::pin(async move {
            let completion = self.client.chat(&body).await.map_err(GenerateError::classify)?;
            let generation = into_generation(completion)?;
            debug!(
                "Generated {} chars (reported tokens: {:?}) with {} at {}",
                generation.text.len(),
                generation.tokens,
                self.model,
                self.client.url()
            );
            Ok(generation)
        })
    }
}

/// An empty completion is transient: the same prompt usually succeeds on retry.
fn into_generation(completion: ChatCompletion) -> Result<Generation, GenerateError> {
    let text = completion
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| GenerateError::Transient("empty completion".into()))?;
    let generation = Generation::new(text);
    Ok(match completion.usage.and_then(|u| u.completion_tokens) {
        Some(tokens) => generation.with_tokens(tokens as usize),
        None => generation,
    })
}
