//! Immutable tokenized text: the run's input document and each level's input.

use std::ops::Range;

use super::tokens::TokenEstimator;

/// Text paired with its token boundaries.
///
/// Built once per level input and never edited afterwards; a new level
/// produces a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedText {
    text: String,
    tokens: Vec<Range<usize>>,
}

impl TokenizedText {
    /// Tokenize `text` with `estimator`.
    pub fn new(text: impl Into<String>, estimator: &dyn TokenEstimator) -> Self {
        let text = text.into();
        let tokens = estimator.tokenize(&text);
        Self { text, tokens }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The text covered by a half-open range of token indices.
    ///
    /// Empty or out-of-bounds ranges yield `""`.
    pub fn span(&self, tokens: Range<usize>) -> &str {
        if tokens.is_empty() || tokens.end > self.tokens.len() {
            return "";
        }
        let start = self.tokens[tokens.start].start;
        let end = self.tokens[tokens.end - 1].end;
        self.text.get(start..end).unwrap_or_default()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// The run's input: read-only text plus its estimated token length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    body: TokenizedText,
}

impl Document {
    pub fn new(text: impl Into<String>, estimator: &dyn TokenEstimator) -> Self {
        Self {
            body: TokenizedText::new(text, estimator),
        }
    }

    pub fn text(&self) -> &str {
        self.body.as_str()
    }

    /// Estimated token length.
    pub fn tokens(&self) -> usize {
        self.body.token_count()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// The tokenized body, used as level 0's input.
    pub fn body(&self) -> &TokenizedText {
        &self.body
    }
}
