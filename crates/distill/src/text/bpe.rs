//! Exact BPE token counting with tiktoken's `cl100k_base` encoding.
//!
//! `cl100k_base` is the encoding used by GPT-4-class models and is a close
//! approximation for most other chat models. Token boundaries come from the
//! encoder itself: each token's decoded byte length advances a cursor over
//! the input.
//!
//! A multi-byte character that the encoder splits across two tokens cannot be
//! cut in the middle, so it is charged to the token that completes it. Counts
//! can therefore fall slightly below the encoder's on text with many such
//! characters.

use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, cl100k_base};

use super::tokens::{CharEstimator, TokenEstimator};

/// Loading the vocabulary is expensive, so the encoder is built once.
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn cl100k_encoder() -> Option<&'static CoreBPE> {
    CL100K.get_or_init(|| cl100k_base().ok()).as_ref()
}

/// [`TokenEstimator`] backed by tiktoken's `cl100k_base` encoding.
///
/// Falls back to [`CharEstimator`] if the encoder cannot be initialized.
///
/// ```ignore
/// let estimator = TiktokenEstimator::cl100k();
/// let result = Summarizer::new(&generator, config)
///     .with_estimator(&estimator)
///     .run(&text)
///     .await?;
/// ```
#[derive(Clone, Copy)]
pub struct TiktokenEstimator {
    encoder: Option<&'static CoreBPE>,
    fallback: CharEstimator,
}

impl fmt::Debug for TiktokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiktokenEstimator")
            .field("encoder", &self.encoder.map(|_| "<cl100k_base>"))
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl TiktokenEstimator {
    pub fn cl100k() -> Self {
        let encoder = cl100k_encoder();
        if encoder.is_none() {
            tracing::error!(
                "Failed to initialize tiktoken cl100k_base encoder, falling back to character estimates"
            );
        }
        Self {
            encoder,
            fallback: CharEstimator::default(),
        }
    }

    /// Whether counts come from the BPE encoder rather than the fallback.
    pub fn is_exact(&self) -> bool {
        self.encoder.is_some()
    }
}

impl Default for TiktokenEstimator {
    fn default() -> Self {
        Self::cl100k()
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn tokenize(&self, text: &str) -> Vec<Range<usize>> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.encoder
            .and_then(|encoder| bpe_ranges(encoder, text))
            .unwrap_or_else(|| self.fallback.tokenize(text))
    }
}

/// Byte ranges of each encoded token, merged where a token ends inside a
/// character. `None` if the decoded tokens do not add up to `text`.
fn bpe_ranges(encoder: &CoreBPE, text: &str) -> Option<Vec<Range<usize>>> {
    let mut ranges = Vec::new();
    let (mut start, mut end) = (0, 0);
    for token in encoder.encode_ordinary(text) {
        end += encoder._decode_native_and_split(vec![token]).next()?.len();
        if end > start && text.is_char_boundary(end) {
            ranges.push(start..end);
            start = end;
        }
    }
    (end == text.len() && start == end).then_some(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(text: &str, tokens: &[Range<usize>]) {
        assert_eq!(tokens.first().map(|r| r.start), Some(0));
        assert_eq!(tokens.last().map(|r| r.end), Some(text.len()));
        for pair in tokens.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(tokens.iter().all(|r| !r.is_empty()));
    }

    #[test]
    fn counts_match_the_encoder() {
        let est = TiktokenEstimator::cl100k();
        assert!(est.is_exact());
        let text = "The quarterly review covered revenue, hiring, and the roadmap.";
        let expected = cl100k_encoder().map(|e| e.encode_ordinary(text).len());
        assert_eq!(Some(est.estimate(text)), expected);
        assert_tiles(text, &est.tokenize(text));
    }

    #[test]
    fn ranges_respect_char_boundaries() {
        let est = TiktokenEstimator::cl100k();
        let text = "naïve café résumé, über straße 東京 🚀 façade";
        let tokens = est.tokenize(text);
        assert_tiles(text, &tokens);
        for r in &tokens {
            assert!(text.get(r.clone()).is_some(), "range {r:?} splits a char");
        }
        let rebuilt: String = tokens.iter().filter_map(|r| text.get(r.clone())).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn whitespace_only_text_has_no_tokens() {
        let est = TiktokenEstimator::cl100k();
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate(" \n\t "), 0);
    }

    #[test]
    fn encoder_is_shared() {
        let (a, b) = (TiktokenEstimator::cl100k(), TiktokenEstimator::default());
        match (a.encoder, b.encoder) {
            (Some(x), Some(y)) => assert!(std::ptr::eq(x, y)),
            _ => panic!("encoder failed to initialize"),
        }
    }
}
