//! The summarization engine.
//!
//! A run partitions the document into token-bounded segments, summarizes
//! them concurrently, concatenates the summaries in source order, and
//! repeats on the concatenation until it fits one final synthesis call.
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | [`RunConfig`] and its validation |
//! | [`plan`] | Token-aligned segment planning with overlap |
//! | [`map`] | Bounded-concurrency map stage with retries |
//! | [`reduce`] | Reassembly, measured ratios, next-step decision |
//! | [`controller`] | [`Summarizer`], the state machine that drives a run |
//! | [`events`] | Progress observers |
//! | [`stats`] | Per-level statistics and [`RunResult`] |
//! | [`error`] | [`RunError`], [`RunFailure`], [`ConfigError`] |

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod map;
pub mod plan;
pub mod prompt;
pub mod reduce;
pub mod stats;

pub use config::RunConfig;
pub use controller::{Summarizer, run};
pub use error::{ConfigError, RunError, RunFailure};
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    ProgressEvent,
};
pub use map::{SegmentOutcome, SegmentResult};
pub use plan::{Segment, plan_segments};
pub use reduce::LevelOutcome;
pub use stats::{LevelStats, RunPhase, RunResult, RunStats, SegmentFailure};
