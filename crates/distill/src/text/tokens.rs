//! Token estimation.
//!
//! Budget arithmetic needs two things from an estimator: a count, and a way
//! to map token positions back to text so the planner can cut a level's input
//! at token boundaries. [`TokenEstimator::tokenize`] returns contiguous byte
//! ranges that tile the input exactly; [`TokenEstimator::estimate`] is the
//! number of those ranges.
//!
//! Exact tokenizers are model-specific. The estimators here are deterministic
//! approximations that stay additive under concatenation (splitting a text
//! in two changes the total by at most one token at the seam). They attach
//! whitespace to a neighbouring token. For exact BPE counts see
//! [`TiktokenEstimator`](super::TiktokenEstimator).

use std::ops::Range;

/// Default characters per token for [`CharEstimator`].
///
/// Most tokenizers average 3-4 characters per token on English prose. Pieces
/// never exceed this many characters, so re-estimating a token-aligned
/// sub-span can only yield fewer tokens, never more.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Maps text to approximate tokens.
///
/// One estimator instance must serve every measurement within a run so that
/// planning and reduction arithmetic stay self-consistent.
pub trait TokenEstimator: Send + Sync {
    /// Byte ranges of each estimated token.
    ///
    /// The ranges are non-empty, ascending, contiguous, start at `0` and end
    /// at `text.len()`. Whitespace-only text has no tokens.
    fn tokenize(&self, text: &str) -> Vec<Range<usize>>;

    /// Estimated token count of `text`.
    fn estimate(&self, text: &str) -> usize {
        self.tokenize(text).len()
    }
}

/// One token per whitespace-delimited word.
///
/// Coarse but exact to reason about, which makes it the estimator of choice
/// for tests and for callers that budget in words.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordEstimator;

impl TokenEstimator for WordEstimator {
    fn tokenize(&self, text: &str) -> Vec<Range<usize>> {
        tile(text.len(), word_ranges(text))
    }

    fn estimate(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Splits each word into `ceil(chars / chars_per_token)` near-equal pieces.
///
/// Short words count as one token, long identifiers and URLs count as
/// several, which tracks BPE tokenizers far better than a flat word count.
#[derive(Debug, Clone, Copy)]
pub struct CharEstimator {
    chars_per_token: usize,
}

impl CharEstimator {
    /// Create an estimator with a custom characters-per-token ratio.
    /// A ratio of `0` is treated as `1`.
    pub const fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: if chars_per_token == 0 { 1 } else { chars_per_token },
        }
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharEstimator {
    fn tokenize(&self, text: &str) -> Vec<Range<usize>> {
        let mut pieces = Vec::new();
        for word in word_ranges(text) {
            split_word(text, word, self.chars_per_token, &mut pieces);
        }
        tile(text.len(), pieces)
    }
}

/// Byte ranges of maximal non-whitespace runs.
fn word_ranges(text: &str) -> Vec<Range<usize>> {
    let mut words = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                words.push(s..i);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push(s..text.len());
    }
    words
}

/// Split one word into pieces of at most `max_chars` characters, spreading
/// the characters as evenly as possible.
fn split_word(text: &str, word: Range<usize>, max_chars: usize, out: &mut Vec<Range<usize>>) {
    let offsets: Vec<usize> = text
        .get(word.clone())
        .unwrap_or_default()
        .char_indices()
        .map(|(i, _)| word.start + i)
        .collect();
    let n = offsets.len();
    if n == 0 {
        return;
    }
    let pieces = n.div_ceil(max_chars);
    let (base, extra) = (n / pieces, n % pieces);
    let mut at = 0;
    for p in 0..pieces {
        let start = offsets[at];
        at += base + usize::from(p < extra);
        let end = offsets.get(at).copied().unwrap_or(word.end);
        out.push(start..end);
    }
}

/// Stretch ascending, non-overlapping pieces so they tile `0..len`.
///
/// Leading whitespace joins the first token; whitespace between pieces joins
/// the piece before it.
fn tile(len: usize, mut tokens: Vec<Range<usize>>) -> Vec<Range<usize>> {
    if let Some(first) = tokens.first_mut() {
        first.start = 0;
    }
    for i in 1..tokens.len() {
        tokens[i - 1].end = tokens[i].start;
    }
    if let Some(last) = tokens.last_mut() {
        last.end = len;
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(text: &str, tokens: &[Range<usize>]) {
        if text.trim().is_empty() {
            assert!(tokens.is_empty());
            return;
        }
        assert_eq!(tokens.first().map(|r| r.start), Some(0));
        assert_eq!(tokens.last().map(|r| r.end), Some(text.len()));
        for pair in tokens.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(!pair[0].is_empty());
        }
    }

    #[test]
    fn word_estimator_counts_words() {
        let est = WordEstimator;
        assert_eq!(est.estimate("the quick  brown\nfox"), 4);
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("   \n\t "), 0);
    }

    #[test]
    fn word_estimator_tiles_text() {
        let text = "  leading and trailing  ";
        let tokens = WordEstimator.tokenize(text);
        assert_eq!(tokens.len(), 3);
        assert_tiles(text, &tokens);
        assert_eq!(&text[tokens[0].clone()], "  leading ");
        assert_eq!(&text[tokens[2].clone()], "trailing  ");
    }

    #[test]
    fn char_estimator_splits_long_words() {
        let est = CharEstimator::default();
        assert_eq!(est.estimate("a bb ccc dddd"), 4);
        assert_eq!(est.estimate("abcdefghi"), 3);
        let tokens = est.tokenize("abcdefghi");
        let lens: Vec<usize> = tokens.iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![3, 3, 3]);
    }

    #[test]
    fn char_estimator_handles_multibyte() {
        let est = CharEstimator::new(2);
        let text = "héllo wörld";
        let tokens = est.tokenize(text);
        assert_tiles(text, &tokens);
        for r in &tokens {
            assert!(text.get(r.clone()).is_some(), "range {r:?} splits a char");
        }
        assert_eq!(tokens.len(), 6);
    }

    #[test]
    fn estimate_is_near_additive() {
        let est = CharEstimator::default();
        let a = "The committee reviewed the proposal";
        let b = "and approved the budget for next year.";
        let joined = format!("{a} {b}");
        let sum = est.estimate(a) + est.estimate(b);
        assert!(est.estimate(&joined).abs_diff(sum) <= 1);
    }

    #[test]
    fn token_aligned_spans_never_grow_on_reestimate() {
        let est = CharEstimator::default();
        let text = "internationalization considerations outweigh straightforward \
                    implementations occasionally";
        let tokens = est.tokenize(text);
        for start in 0..tokens.len() {
            for end in start + 1..=tokens.len() {
                let span = &text[tokens[start].start..tokens[end - 1].end];
                assert!(
                    est.estimate(span) <= end - start,
                    "span {start}..{end} ({span:?}) re-estimated above its range"
                );
            }
        }
    }

    #[test]
    fn zero_ratio_is_clamped() {
        assert_eq!(CharEstimator::new(0).chars_per_token(), 1);
    }
}
