//! Typed failures for configuration and runs.

use super::stats::{LevelStats, RunStats};
use crate::api::GenerateError;

/// A [`RunConfig`](super::RunConfig) that cannot drive a terminating run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("per_call_token_limit must be greater than zero")]
    ZeroCallLimit,
    #[error("final_token_target must be greater than zero")]
    ZeroFinalTarget,
    #[error("overlap_tokens ({overlap}) must be below per_call_token_limit ({limit})")]
    OverlapTooLarge { overlap: usize, limit: usize },
    #[error("{field} must be a fraction in range, got {value}")]
    InvalidFraction { field: &'static str, value: f64 },
    #[error("max_levels must be at least 1")]
    ZeroMaxLevels,
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,
    #[error(
        "no room for text: call ceiling of {ceiling} tokens leaves nothing after {overlap} overlap tokens"
    )]
    NoUsableBudget { ceiling: usize, overlap: usize },
}

/// Why a run stopped without producing a summary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A segment failed permanently and `partial_tolerance` is off.
    #[error("segment {index} at level {level} failed after {attempts} attempt(s): {error}")]
    SegmentFailed {
        level: u32,
        index: usize,
        attempts: u32,
        error: GenerateError,
    },

    /// Two consecutive levels barely shrank the text.
    #[error(
        "summaries stopped shrinking at level {level}: measured ratios {previous_ratio:.3} then \
         {latest_ratio:.3}; raise final_token_target or lower assumed_compression_ratio"
    )]
    Convergence {
        level: u32,
        previous_ratio: f64,
        latest_ratio: f64,
    },

    /// The level cap was reached before the text fit the final call.
    #[error("no convergence within {max_levels} level(s)")]
    DepthExceeded {
        max_levels: u32,
        trace: Vec<LevelStats>,
    },

    /// The final synthesis call failed.
    #[error("final synthesis failed after {attempts} attempt(s): {error}")]
    Synthesis { attempts: u32, error: GenerateError },

    /// The stop signal fired.
    #[error("run cancelled at level {level}")]
    Cancelled { level: u32 },
}

/// A failed run together with the statistics gathered before it stopped.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: RunError,
    pub stats: RunStats,
}

impl RunFailure {
    pub fn new(error: RunError, stats: RunStats) -> Self {
        Self { error, stats }
    }

    /// Best-effort text salvaged from a cancelled run, if any.
    pub fn partial_output(&self) -> Option<&str> {
        self.stats.partial_output.as_deref()
    }
}

impl From<ConfigError> for RunFailure {
    fn from(e: ConfigError) -> Self {
        Self::new(RunError::Config(e), RunStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convergence_message_names_both_ratios() {
        let e = RunError::Convergence {
            level: 1,
            previous_ratio: 0.99,
            latest_ratio: 1.0,
        };
        let msg = e.to_string();
        assert!(msg.contains("0.990"));
        assert!(msg.contains("1.000"));
    }

    #[test]
    fn failure_displays_inner_error() {
        let failure: RunFailure = ConfigError::ZeroCallLimit.into();
        assert!(failure.to_string().contains("per_call_token_limit"));
        assert!(failure.stats.levels.is_empty());
    }
}
