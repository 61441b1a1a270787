//! Level reduction: reassemble segment outputs and decide what happens next.

use tracing::{debug, warn};

use super::config::RunConfig;
use super::map::{SegmentOutcome, SegmentResult};
use super::prompt::{self, SECTION_SEPARATOR};
use super::stats::SegmentFailure;
use crate::text::TokenEstimator;

/// One level's reassembled output.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelOutcome {
    /// Summaries and placeholders joined in ascending segment order.
    pub text: String,
    pub tokens: usize,
    /// Segments replaced by placeholders.
    pub failures: Vec<SegmentFailure>,
    /// Segments that produced a summary.
    pub completed: usize,
}

/// Join `results` in segment-index order, whatever order they arrive in.
///
/// Failed segments become placeholders; segments that never started are
/// skipped.
pub fn assemble(results: &[SegmentResult], estimator: &dyn TokenEstimator) -> LevelOutcome {
    let mut ordered: Vec<&SegmentResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.index);

    let mut parts = Vec::with_capacity(ordered.len());
    let mut failures = Vec::new();
    let mut completed = 0;
    for result in ordered {
        match &result.outcome {
            SegmentOutcome::Summary { text, .. } => {
                completed += 1;
                parts.push(text.trim().to_string());
            }
            SegmentOutcome::Failed(error) => {
                parts.push(prompt::placeholder(result.index, error));
                failures.push(SegmentFailure {
                    index: result.index,
                    attempts: result.attempts,
                    kind: error.kind(),
                    message: error.message().to_string(),
                });
            }
            SegmentOutcome::NotStarted => {}
        }
    }

    let text = parts.join(SECTION_SEPARATOR);
    let tokens = estimator.estimate(&text);
    LevelOutcome {
        text,
        tokens,
        failures,
        completed,
    }
}

/// `output / input`, with an empty input counting as fully compressed.
pub fn compression_ratio(input_tokens: usize, output_tokens: usize) -> f64 {
    if input_tokens == 0 {
        0.0
    } else {
        output_tokens as f64 / input_tokens as f64
    }
}

/// What the controller does after a level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The output fits one call: run final synthesis on it.
    Synthesize,
    /// Plan and map the output as the next level's input.
    Recurse,
    /// Two consecutive levels barely shrank the text.
    Stalled { previous_ratio: f64, latest_ratio: f64 },
    /// The level cap is reached and the output still does not fit.
    DepthExceeded,
}

/// Watches measured ratios for levels that stop making progress.
#[derive(Debug, Clone)]
pub struct ConvergenceGuard {
    epsilon: f64,
    previous_stalled: Option<f64>,
}

impl ConvergenceGuard {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            previous_stalled: None,
        }
    }

    /// Record a level's ratio. Returns the previous ratio when both it and
    /// `ratio` are within epsilon of 1.0 (or above).
    pub fn observe(&mut self, ratio: f64) -> Option<f64> {
        let stalled = ratio >= 1.0 - self.epsilon;
        let previous = self.previous_stalled;
        self.previous_stalled = stalled.then_some(ratio);
        if stalled { previous } else { None }
    }
}

/// Choose the next step after `level` produced `output_tokens`.
pub fn decide(
    level: u32,
    output_tokens: usize,
    ratio: f64,
    config: &RunConfig,
    usable: usize,
    guard: &mut ConvergenceGuard,
) -> Decision {
    let stalled_after = guard.observe(ratio);
    if output_tokens <= usable {
        debug!("[level {level}] {output_tokens} tokens fit in one call");
        return Decision::Synthesize;
    }
    if let Some(previous_ratio) = stalled_after {
        warn!("[level {level}] compression stalled: {previous_ratio:.3} then {ratio:.3}");
        return Decision::Stalled {
            previous_ratio,
            latest_ratio: ratio,
        };
    }
    if level + 1 >= config.max_levels {
        return Decision::DepthExceeded;
    }
    debug!("[level {level}] {output_tokens} tokens exceed {usable}, recursing");
    Decision::Recurse
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GenerateError;
    use crate::text::WordEstimator;

    fn summary(index: usize, text: &str) -> SegmentResult {
        SegmentResult {
            index,
            attempts: 1,
            outcome: SegmentOutcome::Summary {
                text: text.into(),
                tokens: WordEstimator.estimate(text),
            },
        }
    }

    #[test]
    fn assembles_in_index_order() {
        let results = vec![summary(2, "gamma"), summary(0, "alpha"), summary(1, "beta")];
        let outcome = assemble(&results, &WordEstimator);
        assert_eq!(outcome.text, "alpha\n\nbeta\n\ngamma");
        assert_eq!(outcome.tokens, 3);
        assert_eq!(outcome.completed, 3);
    }

    #[test]
    fn failures_become_placeholders() {
        let results = vec![
            summary(0, "alpha"),
            SegmentResult {
                index: 1,
                attempts: 4,
                outcome: SegmentOutcome::Failed(GenerateError::Transient("timeout".into())),
            },
            summary(2, "gamma"),
        ];
        let outcome = assemble(&results, &WordEstimator);
        assert_eq!(
            outcome.text,
            "alpha\n\n[Section 2 omitted: transient failure]\n\ngamma"
        );
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].attempts, 4);
        assert_eq!(outcome.failures[0].message, "timeout");
    }

    #[test]
    fn guard_needs_two_consecutive_stalls() {
        let mut guard = ConvergenceGuard::new(0.02);
        assert_eq!(guard.observe(0.99), None);
        assert_eq!(guard.observe(0.5), None);
        assert_eq!(guard.observe(1.01), None);
        assert_eq!(guard.observe(0.985), Some(1.01));
    }

    #[test]
    fn decision_prefers_synthesis_when_output_fits() {
        let cfg = RunConfig::new(1000, 100).with_max_levels(1);
        let mut guard = ConvergenceGuard::new(0.02);
        assert_eq!(decide(0, 700, 0.2, &cfg, 750, &mut guard), Decision::Synthesize);
        assert_eq!(decide(0, 800, 0.2, &cfg, 750, &mut guard), Decision::DepthExceeded);
    }

    #[test]
    fn decision_recurses_below_cap() {
        let cfg = RunConfig::new(1000, 100).with_max_levels(3);
        let mut guard = ConvergenceGuard::new(0.02);
        assert_eq!(decide(0, 2000, 0.3, &cfg, 750, &mut guard), Decision::Recurse);
        assert_eq!(decide(1, 900, 0.45, &cfg, 750, &mut guard), Decision::Recurse);
        assert_eq!(decide(2, 800, 0.9, &cfg, 750, &mut guard), Decision::DepthExceeded);
    }

    #[test]
    fn decision_reports_stall() {
        let cfg = RunConfig::new(1000, 100);
        let mut guard = ConvergenceGuard::new(0.02);
        assert_eq!(decide(0, 5000, 1.0, &cfg, 750, &mut guard), Decision::Recurse);
        assert_eq!(
            decide(1, 5000, 1.0, &cfg, 750, &mut guard),
            Decision::Stalled {
                previous_ratio: 1.0,
                latest_ratio: 1.0
            }
        );
    }
}
