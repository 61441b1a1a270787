//! Run configuration with validated budget arithmetic.
//!
//! [`RunConfig`] is an explicit value passed into each run; nothing is read
//! from process-wide state. It deserializes with `#[serde(default)]`, so a
//! wrapper can load a partial JSON object and inherit the defaults for every
//! missing field.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::api::RetryConfig;

/// Caller-supplied configuration for one summarization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hard ceiling on tokens fed to a single generation call. Default: `4000`.
    pub per_call_token_limit: usize,
    /// Desired size of the final summary, in tokens. Default: `500`.
    pub final_token_target: usize,
    /// Tokens of preceding context repeated at the start of each segment
    /// after the first. Must be below `per_call_token_limit`. Default: `100`.
    pub overlap_tokens: usize,
    /// Fraction of `per_call_token_limit` usable for text; the rest is left
    /// for prompt scaffolding. Default: `0.85`.
    pub safety_margin: f64,
    /// Prior summary:source ratio used for the per-call output hint only.
    /// Never trusted for convergence decisions. Default: `0.15`.
    pub assumed_compression_ratio: f64,
    /// Maximum number of levels before the run fails. Default: `6`.
    pub max_levels: u32,
    /// Retries per segment for transient failures. Default: `3`.
    pub max_retries_per_segment: u32,
    /// Replace permanently failed segments with a placeholder instead of
    /// aborting. Default: `false`.
    pub partial_tolerance: bool,
    /// Concurrent generation calls within one level. Default: `4`.
    pub max_concurrency: usize,
    /// Delay before the first retry, in milliseconds. Default: `500`.
    pub retry_backoff_ms: u64,
    /// Cap on the retry delay, in milliseconds. Default: `8000`.
    pub retry_max_backoff_ms: u64,
    /// A level whose measured ratio is at least `1 - stall_epsilon` counts as
    /// stalled; two stalled levels in a row fail the run. Default: `0.02`.
    pub stall_epsilon: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            per_call_token_limit: 4000,
            final_token_target: 500,
            overlap_tokens: 100,
            safety_margin: 0.85,
            assumed_compression_ratio: 0.15,
            max_levels: 6,
            max_retries_per_segment: 3,
            partial_tolerance: false,
            max_concurrency: 4,
            retry_backoff_ms: 500,
            retry_max_backoff_ms: 8000,
            stall_epsilon: 0.02,
        }
    }
}

impl RunConfig {
    /// Defaults with the two budgets every caller should think about.
    pub fn new(per_call_token_limit: usize, final_token_target: usize) -> Self {
        Self {
            per_call_token_limit,
            final_token_target,
            ..Default::default()
        }
    }

    pub fn with_overlap_tokens(mut self, tokens: usize) -> Self {
        self.overlap_tokens = tokens;
        self
    }

    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_assumed_compression_ratio(mut self, ratio: f64) -> Self {
        self.assumed_compression_ratio = ratio;
        self
    }

    pub fn with_max_levels(mut self, levels: u32) -> Self {
        self.max_levels = levels;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries_per_segment = retries;
        self
    }

    pub fn with_partial_tolerance(mut self, tolerate: bool) -> Self {
        self.partial_tolerance = tolerate;
        self
    }

    pub fn with_max_concurrency(mut self, workers: usize) -> Self {
        self.max_concurrency = workers;
        self
    }

    /// Set the initial and maximum retry backoff.
    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_backoff_ms = initial.as_millis() as u64;
        self.retry_max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn with_stall_epsilon(mut self, epsilon: f64) -> Self {
        self.stall_epsilon = epsilon;
        self
    }

    /// Reject configurations that cannot produce a terminating run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_call_token_limit == 0 {
            return Err(ConfigError::ZeroCallLimit);
        }
        if self.final_token_target == 0 {
            return Err(ConfigError::ZeroFinalTarget);
        }
        if self.overlap_tokens >= self.per_call_token_limit {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.overlap_tokens,
                limit: self.per_call_token_limit,
            });
        }
        check_fraction("safety_margin", self.safety_margin)?;
        check_fraction("assumed_compression_ratio", self.assumed_compression_ratio)?;
        if !(0.0..1.0).contains(&self.stall_epsilon) {
            return Err(ConfigError::InvalidFraction {
                field: "stall_epsilon",
                value: self.stall_epsilon,
            });
        }
        if self.max_levels == 0 {
            return Err(ConfigError::ZeroMaxLevels);
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        self.usable_tokens().map(|_| ())
    }

    /// Maximum tokens of text a single call may carry:
    /// `floor(per_call_token_limit × safety_margin)`.
    pub fn call_ceiling(&self) -> usize {
        // Nudge before flooring so 4000 × 0.85 lands on 3400, not 3399.
        (self.per_call_token_limit as f64 * self.safety_margin + 1e-9).floor() as usize
    }

    /// Core tokens per segment: the call ceiling minus overlap.
    ///
    /// Also the threshold under which a level's output is small enough for
    /// the final synthesis call.
    pub fn usable_tokens(&self) -> Result<usize, ConfigError> {
        let ceiling = self.call_ceiling();
        match ceiling.checked_sub(self.overlap_tokens) {
            Some(usable) if usable > 0 => Ok(usable),
            _ => Err(ConfigError::NoUsableBudget {
                ceiling,
                overlap: self.overlap_tokens,
            }),
        }
    }

    /// Output-token hint for summarizing a segment of `segment_tokens`.
    pub fn map_output_hint(&self, segment_tokens: usize) -> usize {
        ((segment_tokens as f64 * self.assumed_compression_ratio).ceil() as usize).max(1)
    }

    /// Backoff schedule for per-segment retries.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries_per_segment,
            initial_delay: Duration::from_millis(self.retry_backoff_ms),
            max_delay: Duration::from_millis(self.retry_max_backoff_ms.max(self.retry_backoff_ms)),
            ..RetryConfig::default()
        }
    }
}

/// Accept values in `(0, 1]`.
fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidFraction { field, value })
    }
}
