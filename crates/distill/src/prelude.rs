//! Convenience re-exports for common `distill` types.
//!
//! Meant to be glob-imported when embedding the summarizer:
//!
//! ```ignore
//! use distill::prelude::*;
//! ```
//!
//! This pulls in the run controller and its configuration, the generator
//! trait with its built-in implementations, the event handlers, and the
//! token estimators. Planning and map-stage internals are left out; import
//! those from [`engine`](crate::engine) directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatClient, DEFAULT_CHAT_URL, DEFAULT_MODEL, Message};

// ── Generation ──────────────────────────────────────────────────────
pub use crate::api::{
    ChatGenerator, ErrorKind, FnGenerator, GenerateError, GenerateFuture, Generation, Generator,
    RetryConfig,
};

// ── Engine ──────────────────────────────────────────────────────────
pub use crate::engine::{
    CompositeEventHandler, ConfigError, EventHandler, FnEventHandler, LevelStats, LoggingHandler,
    NoopHandler, ProgressEvent, RunConfig, RunError, RunFailure, RunPhase, RunResult, RunStats,
    Summarizer,
};

// ── Text ────────────────────────────────────────────────────────────
pub use crate::text::{CharEstimator, Document, TiktokenEstimator, TokenEstimator, WordEstimator};
