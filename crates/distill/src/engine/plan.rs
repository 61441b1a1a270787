//! Chunk planning: partition a level's input into segments that each fit
//! one generation call.
//!
//! Segments are cut on token boundaries. Each segment owns a *core* range;
//! cores are disjoint, ascending, and together cover the whole input. Every
//! segment after the first also repeats up to `overlap_tokens` of the
//! preceding text as context, which is never counted in the core.
//!
//! With `usable = floor(limit × margin) − overlap`, the planner picks
//! `ceil(T / usable)` segments and spreads `T` over them as evenly as
//! possible, so a core never exceeds `usable` and a full span (core plus
//! overlap) never exceeds the call ceiling.

use std::ops::Range;

use tracing::debug;

use super::config::RunConfig;
use super::error::ConfigError;
use crate::text::TokenizedText;

/// One slice of a level's input, sized for a single generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Zero-based position in source order.
    pub index: usize,
    /// Token range this segment is responsible for.
    pub core: Range<usize>,
    /// Token range actually sent: the core extended backward by the overlap.
    pub span: Range<usize>,
    /// Text of `span`.
    pub text: String,
    /// Byte offset in `text` where the core begins (the overlap's length).
    pub core_offset: usize,
}

impl Segment {
    /// The overlap context repeated from the previous segment.
    pub fn overlap_text(&self) -> &str {
        self.text.get(..self.core_offset).unwrap_or_default()
    }

    /// The text this segment is responsible for summarizing.
    pub fn core_text(&self) -> &str {
        self.text.get(self.core_offset..).unwrap_or_default()
    }

    /// Tokens sent to the generation call (core plus overlap).
    pub fn tokens(&self) -> usize {
        self.span.len()
    }

    pub fn core_tokens(&self) -> usize {
        self.core.len()
    }

    pub fn overlap_tokens(&self) -> usize {
        self.core.start - self.span.start
    }
}

/// Plan the segments for `input`.
///
/// Deterministic: the same input and config always yield the same
/// boundaries. An input with no tokens yields no segments.
pub fn plan_segments(input: &TokenizedText, config: &RunConfig) -> Result<Vec<Segment>, ConfigError> {
    let usable = config.usable_tokens()?;
    let total = input.token_count();

    if total == 0 {
        return Ok(Vec::new());
    }

    // Text shorter than the overlap alone is never split.
    if total <= usable || total <= config.overlap_tokens {
        debug!("Planned 1 segment for {total} tokens (usable {usable})");
        return Ok(vec![Segment {
            index: 0,
            core: 0..total,
            span: 0..total,
            text: input.as_str().to_string(),
            core_offset: 0,
        }]);
    }

    let count = total.div_ceil(usable);
    let (base, extra) = (total / count, total % count);

    let mut segments = Vec::with_capacity(count);
    let mut start = 0;
    for index in 0..count {
        let len = base + usize::from(index < extra);
        let core = start..start + len;
        let span_start = if index == 0 {
            core.start
        } else {
            core.start.saturating_sub(config.overlap_tokens)
        };
        let span = span_start..core.end;
        segments.push(Segment {
            index,
            text: input.span(span.clone()).to_string(),
            core_offset: input.span(span.start..core.start).len(),
            core,
            span,
        });
        start += len;
    }

    debug!(
        "Planned {count} segments for {total} tokens (~{base} core tokens each, overlap {})",
        config.overlap_tokens
    );
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{CharEstimator, TokenEstimator, WordEstimator};

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn config(limit: usize, overlap: usize) -> RunConfig {
        RunConfig::new(limit, 50).with_overlap_tokens(overlap)
    }

    #[test]
    fn empty_input_has_no_segments() {
        let input = TokenizedText::new("  \n ", &WordEstimator);
        assert!(plan_segments(&input, &config(100, 0)).unwrap().is_empty());
    }

    #[test]
    fn small_input_is_one_segment() {
        let input = TokenizedText::new(words(40), &WordEstimator);
        let segments = plan_segments(&input, &config(100, 10)).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].core, 0..40);
        assert_eq!(segments[0].text, input.as_str());
    }

    #[test]
    fn large_input_is_split_evenly() {
        // usable = 85 - 0 = 85; 200 tokens -> 3 segments of 67/67/66.
        let input = TokenizedText::new(words(200), &WordEstimator);
        let segments = plan_segments(&input, &config(100, 0)).unwrap();
        let sizes: Vec<usize> = segments.iter().map(Segment::core_tokens).collect();
        assert_eq!(sizes, vec![67, 67, 66]);
    }

    #[test]
    fn overlap_extends_all_but_first() {
        let input = TokenizedText::new(words(200), &WordEstimator);
        let segments = plan_segments(&input, &config(100, 15)).unwrap();
        assert_eq!(segments[0].overlap_tokens(), 0);
        for s in &segments[1..] {
            assert_eq!(s.overlap_tokens(), 15);
            assert!(s.text.starts_with(&format!("w{} ", s.span.start)));
            assert!(s.core_text().starts_with(&format!("w{} ", s.core.start)));
            assert_eq!(format!("{}{}", s.overlap_text(), s.core_text()), s.text);
        }
    }

    #[test]
    fn cores_cover_input_without_gaps() {
        let text = "Alpha  beta,\ngamma delta epsilon zeta eta theta iota kappa lambda mu nu xi \
                    omicron pi rho sigma tau upsilon phi chi psi omega.  ";
        let input = TokenizedText::new(text, &WordEstimator);
        let segments = plan_segments(&input, &RunConfig::new(10, 5).with_overlap_tokens(2)).unwrap();
        assert!(segments.len() > 1);
        let rebuilt: String = segments.iter().map(|s| input.span(s.core.clone())).collect();
        assert_eq!(rebuilt, text);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].core.end, pair[1].core.start);
        }
    }

    #[test]
    fn segment_text_fits_call_ceiling() {
        let est = CharEstimator::default();
        let text = "Extraordinarily verbose documentation accompanies every \
                    configuration option. "
            .repeat(60);
        let input = TokenizedText::new(text, &est);
        let cfg = RunConfig::new(120, 50).with_overlap_tokens(20);
        let segments = plan_segments(&input, &cfg).unwrap();
        assert!(segments.len() > 1);
        for s in &segments {
            assert!(s.tokens() <= cfg.call_ceiling());
            assert!(est.estimate(&s.text) <= cfg.call_ceiling());
        }
    }

    #[test]
    fn planning_is_deterministic() {
        let input = TokenizedText::new(words(1234), &WordEstimator);
        let cfg = config(100, 7);
        assert_eq!(
            plan_segments(&input, &cfg).unwrap(),
            plan_segments(&input, &cfg).unwrap()
        );
    }

    #[test]
    fn text_within_overlap_is_never_split() {
        // ceiling 85, overlap 80 -> usable 5; 60 tokens is shorter than the overlap.
        let input = TokenizedText::new(words(60), &WordEstimator);
        let segments = plan_segments(&input, &config(100, 80)).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn unusable_budget_is_a_config_error() {
        let input = TokenizedText::new(words(10), &WordEstimator);
        let err = plan_segments(&input, &config(100, 90)).unwrap_err();
        assert!(matches!(err, ConfigError::NoUsableBudget { .. }));
    }
}
