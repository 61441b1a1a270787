//! Per-level diagnostics and the final run result.

use serde::Serialize;

use crate::api::ErrorKind;

/// Where the run controller is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning(u32),
    Mapping(u32),
    Reducing(u32),
    Synthesizing,
    Done,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Planning(level) => write!(f, "planning level {level}"),
            RunPhase::Mapping(level) => write!(f, "mapping level {level}"),
            RunPhase::Reducing(level) => write!(f, "reducing level {level}"),
            RunPhase::Synthesizing => write!(f, "synthesizing"),
            RunPhase::Done => write!(f, "done"),
            RunPhase::Failed => write!(f, "failed"),
        }
    }
}

/// A segment that failed after its retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentFailure {
    pub index: usize,
    pub attempts: u32,
    pub kind: ErrorKind,
    pub message: String,
}

/// Statistics for one level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStats {
    /// Zero-based level number.
    pub level: u32,
    pub input_tokens: usize,
    pub segment_count: usize,
    /// Tokens in the level's concatenated output.
    pub output_tokens: usize,
    /// Measured `output_tokens / input_tokens`.
    pub compression_ratio: f64,
    /// Generation calls issued for this level, retries included.
    pub generation_calls: usize,
    /// `true` when the input already fit and the map stage was skipped.
    pub map_skipped: bool,
    /// Failed segments. In a successful run every one of them was tolerated
    /// and replaced by a placeholder.
    pub failed_segments: Vec<SegmentFailure>,
}

/// Statistics accumulated by the run controller.
///
/// Attached to every [`RunFailure`](super::RunFailure) so callers can see how
/// far a failed run progressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub document_tokens: usize,
    pub levels: Vec<LevelStats>,
    /// All generation calls, synthesis and retries included.
    pub generation_calls: usize,
    /// Concatenated output of the segments completed before cancellation,
    /// in segment order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_output: Option<String>,
    /// Phase the run was in when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<RunPhase>,
    pub elapsed_ms: u64,
}

impl RunStats {
    pub fn tolerated_failure_count(&self) -> usize {
        self.levels.iter().map(|l| l.failed_segments.len()).sum()
    }
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub summary: String,
    pub final_tokens: usize,
    /// Number of levels executed.
    pub levels: usize,
    pub level_stats: Vec<LevelStats>,
    /// `final_tokens / document_tokens`; `0.0` for an empty document.
    pub compression_ratio: f64,
    pub document_tokens: usize,
    pub generation_calls: usize,
    pub tolerated_failures: usize,
    pub elapsed_ms: u64,
}

impl RunResult {
    /// Assemble the result from the controller's accumulated statistics.
    pub(crate) fn from_stats(summary: String, final_tokens: usize, stats: RunStats) -> Self {
        let compression_ratio = if stats.document_tokens == 0 {
            0.0
        } else {
            final_tokens as f64 / stats.document_tokens as f64
        };
        Self {
            summary,
            final_tokens,
            levels: stats.levels.len(),
            tolerated_failures: stats.tolerated_failure_count(),
            compression_ratio,
            document_tokens: stats.document_tokens,
            generation_calls: stats.generation_calls,
            elapsed_ms: stats.elapsed_ms,
            level_stats: stats.levels,
        }
    }

    /// Short statistics footer, one fact per line.
    pub fn stats_report(&self) -> String {
        let mut out = format!(
            "Statistics:\n- Original: {} tokens\n- Levels: {}\n",
            self.document_tokens, self.levels
        );
        for level in &self.level_stats {
            if level.map_skipped {
                out.push_str(&format!(
                    "  - level {}: {} tokens, fits in one call\n",
                    level.level, level.input_tokens
                ));
            } else {
                out.push_str(&format!(
                    "  - level {}: {} tokens in {} segment(s) -> {} tokens ({:.1}%)\n",
                    level.level,
                    level.input_tokens,
                    level.segment_count,
                    level.output_tokens,
                    level.compression_ratio * 100.0
                ));
            }
        }
        out.push_str(&format!(
            "- Final: {} tokens\n- Compression: {:.1}%\n- Generation calls: {}\n",
            self.final_tokens,
            self.compression_ratio * 100.0,
            self.generation_calls
        ));
        if self.tolerated_failures > 0 {
            out.push_str(&format!(
                "- Omitted segments: {}\n",
                self.tolerated_failures
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(level: u32, input: usize, output: usize, failures: usize) -> LevelStats {
        LevelStats {
            level,
            input_tokens: input,
            segment_count: input.div_ceil(1000),
            output_tokens: output,
            compression_ratio: output as f64 / input as f64,
            generation_calls: input.div_ceil(1000),
            map_skipped: false,
            failed_segments: (0..failures)
                .map(|index| SegmentFailure {
                    index,
                    attempts: 1,
                    kind: ErrorKind::Permanent,
                    message: "bad".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn result_derives_totals_from_stats() {
        let stats = RunStats {
            document_tokens: 10_000,
            levels: vec![level(0, 10_000, 1_500, 1), level(1, 1_500, 300, 0)],
            generation_calls: 13,
            ..Default::default()
        };
        let result = RunResult::from_stats("done".into(), 250, stats);
        assert_eq!(result.levels, 2);
        assert_eq!(result.tolerated_failures, 1);
        assert!((result.compression_ratio - 0.025).abs() < 1e-9);
    }

    #[test]
    fn empty_document_has_zero_ratio() {
        let result = RunResult::from_stats(String::new(), 0, RunStats::default());
        assert_eq!(result.compression_ratio, 0.0);
        assert_eq!(result.levels, 0);
    }

    #[test]
    fn report_lists_every_level() {
        let stats = RunStats {
            document_tokens: 10_000,
            levels: vec![level(0, 10_000, 1_500, 0), level(1, 1_500, 300, 0)],
            ..Default::default()
        };
        let report = RunResult::from_stats("s".into(), 250, stats).stats_report();
        assert!(report.contains("level 0: 10000 tokens in 10 segment(s)"));
        assert!(report.contains("level 1:"));
        assert!(report.contains("Compression: 2.5%"));
        assert!(!report.contains("Omitted"));
    }
}
