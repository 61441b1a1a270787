//! Retry with exponential backoff for transient generation failures.
//!
//! [`RetryConfig`] computes the backoff schedule; [`retry_generation`] drives
//! a generation call through it, retrying only
//! [`GenerateError::Transient`] failures. The string classifiers
//! ([`is_transient_error`], [`is_permanent_error`]) turn HTTP client error
//! messages into the typed taxonomy.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::generator::GenerateError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries and default delays.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number; concurrent
            // segments retrying together still spread out because their
            // attempt counts drift apart.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Outcome of [`retry_generation`]: the final result and how many calls it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, GenerateError>,
    pub attempts: u32,
}

/// Run `call` until it succeeds, fails permanently, or exhausts retries.
///
/// `should_stop` is consulted before and after each backoff sleep; when it
/// returns `true` the last transient error is returned without another
/// attempt.
pub async fn retry_generation<T, F, Fut>(
    config: &RetryConfig,
    should_stop: impl Fn() -> bool,
    mut call: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => {
                return Attempted {
                    result: Ok(v),
                    attempts: attempt + 1,
                };
            }
            Err(e) if e.is_transient() && attempt < config.max_retries && !should_stop() => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Transient generation error (attempt {}/{}): {e}. Retrying in {delay:?}...",
                    attempt + 1,
                    config.max_retries,
                );
                tokio::time::sleep(delay).await;
                if should_stop() {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt + 1,
                    };
                }
                attempt += 1;
            }
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt + 1,
                };
            }
        }
    }
}

/// Whether an error string indicates a transient (retryable) failure.
pub fn is_transient_error(error: &str) -> bool {
    let transient_statuses = ["408", "429", "500", "502", "503", "504"];
    if transient_statuses
        .iter()
        .any(|s| error.contains(&format!("HTTP {s}")))
    {
        return true;
    }

    let lower = error.to_lowercase();
    [
        "request failed:",
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
        "broken pipe",
        "network",
        "rate limit",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Whether an error is a permanent (non-retryable) failure.
pub fn is_permanent_error(error: &str) -> bool {
    [
        "HTTP 400",
        "HTTP 401",
        "HTTP 403",
        "HTTP 404",
        "HTTP 413",
        "HTTP 422",
        "invalid",
        "bad request",
        "unauthorized",
    ]
    .iter()
    .any(|p| error.contains(p))
}
