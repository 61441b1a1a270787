//! Progress events and observers for the [`Summarizer`](super::Summarizer).
//!
//! Observers are purely observational: [`EventHandler::on_event`] returns
//! nothing and cannot influence control flow. Progress that used to be
//! printed as it happened is delivered here instead, so the engine stays
//! usable in non-interactive and test contexts.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use tracing::{debug, info, warn};

use super::stats::LevelStats;

/// Events emitted by the summarizer during a run.
#[derive(Debug)]
pub enum ProgressEvent<'a> {
    /// A level's input was planned into segments.
    LevelStarted {
        level: u32,
        input_tokens: usize,
        segments_total: usize,
    },
    /// One segment finished (successfully or not).
    SegmentCompleted {
        level: u32,
        index: usize,
        segments_done: usize,
        segments_total: usize,
        failed: bool,
    },
    /// A level's outputs were reassembled and measured.
    LevelCompleted {
        level: u32,
        segments_done: usize,
        segments_total: usize,
        stats: &'a LevelStats,
    },
    /// The final synthesis call is about to run.
    Synthesizing { level: u32, input_tokens: usize },
    /// The run produced its summary.
    Finished { final_tokens: usize, levels: usize },
    /// The stop signal was observed.
    Cancelled { level: u32 },
}

impl ProgressEvent<'_> {
    /// `(level, segments_done, segments_total)` for segment and level
    /// completions, `None` for everything else.
    pub fn progress(&self) -> Option<(u32, usize, usize)> {
        match self {
            ProgressEvent::SegmentCompleted {
                level,
                segments_done,
                segments_total,
                ..
            }
            | ProgressEvent::LevelCompleted {
                level,
                segments_done,
                segments_total,
                ..
            } => Some((*level, *segments_done, *segments_total)),
            _ => None,
        }
    }
}

/// Observer for summarizer progress.
///
/// Handlers are called from the map stage while other segments are still in
/// flight, so implementations must be `Send + Sync` and should return quickly.
///
/// # Example
///
/// ```ignore
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &ProgressEvent<'_>) {
///         if let Some((level, done, total)) = event.progress() {
///             eprintln!("level {level}: {done}/{total}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &ProgressEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let Some((level, done, total)) = event.progress() {
///         println!("[{level}] {done}/{total}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ProgressEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ProgressEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ProgressEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add a handler only when `condition` holds, keeping the builder chain intact.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &ProgressEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs progress through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ProgressEvent<'_>) {
        match event {
            ProgressEvent::LevelStarted {
                level,
                input_tokens,
                segments_total,
            } => {
                info!("[level {level}] {input_tokens} tokens in {segments_total} segment(s)");
            }
            ProgressEvent::SegmentCompleted {
                level,
                index,
                segments_done,
                segments_total,
                failed,
            } => {
                if *failed {
                    warn!("[level {level}] segment {index} failed ({segments_done}/{segments_total})");
                } else {
                    debug!("[level {level}] segment {index} done ({segments_done}/{segments_total})");
                }
            }
            ProgressEvent::LevelCompleted { level, stats, .. } => {
                info!(
                    "[level {level}] {} -> {} tokens (ratio {:.3})",
                    stats.input_tokens, stats.output_tokens, stats.compression_ratio
                );
            }
            ProgressEvent::Synthesizing {
                level,
                input_tokens,
            } => {
                info!("[level {level}] synthesizing final summary from {input_tokens} tokens");
            }
            ProgressEvent::Finished {
                final_tokens,
                levels,
            } => {
                info!("Summary ready: {final_tokens} tokens after {levels} level(s)");
            }
            ProgressEvent::Cancelled { level } => {
                warn!("Run cancelled at level {level}");
            }
        }
    }
}
