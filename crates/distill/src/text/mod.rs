//! Text primitives: token estimation and immutable tokenized text.
//!
//! - [`tokens`]: the [`TokenEstimator`] trait with [`WordEstimator`] and
//!   [`CharEstimator`] implementations.
//! - [`bpe`]: [`TiktokenEstimator`], exact `cl100k_base` BPE counts.
//! - [`document`]: [`Document`] (the run input) and [`TokenizedText`]
//!   (any level's input, addressable by token index).

pub mod bpe;
pub mod document;
pub mod tokens;

pub use bpe::TiktokenEstimator;
pub use document::{Document, TokenizedText};
pub use tokens::{CharEstimator, DEFAULT_CHARS_PER_TOKEN, TokenEstimator, WordEstimator};
