//! The run controller.
//!
//! [`Summarizer`] drives a document through
//! `Planning → Mapping(level) → Reducing(level) → … → Synthesizing → Done`.
//! It alone owns the level counter, the statistics accumulator, and the
//! concurrency semaphore, and it is the only place that decides whether the
//! run recurses, synthesizes, or fails.

use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::config::RunConfig;
use super::error::{RunError, RunFailure};
use super::events::{EventHandler, NoopHandler, ProgressEvent};
use super::map::{MapStage, SegmentOutcome, SegmentResult};
use super::plan::plan_segments;
use super::prompt;
use super::reduce::{self, ConvergenceGuard, Decision};
use super::stats::{LevelStats, RunPhase, RunResult, RunStats};
use crate::api::Generator;
use crate::api::retry::retry_generation;
use crate::text::{CharEstimator, DEFAULT_CHARS_PER_TOKEN, Document, TokenEstimator, TokenizedText};

static DEFAULT_ESTIMATOR: CharEstimator = CharEstimator::new(DEFAULT_CHARS_PER_TOKEN);

/// Hierarchical map-reduce summarizer.
///
/// Borrows its generator, estimator, and event handler, so one set of
/// collaborators can serve many runs. Runs share no state with each other.
///
/// ```ignore
/// let summary = Summarizer::new(&generator, RunConfig::default())
///     .with_event_handler(&LoggingHandler)
///     .with_stop_signal(|| stop.load(Ordering::SeqCst))
///     .run(&text)
///     .await?;
/// ```
pub struct Summarizer<'a> {
    generator: &'a dyn Generator,
    config: RunConfig,
    estimator: &'a dyn TokenEstimator,
    event_handler: &'a dyn EventHandler,
    /// Checked before each segment is dispatched, between levels, and before
    /// synthesis. Calls already in flight are not interrupted.
    stop_signal: Option<Box<dyn Fn() -> bool + Send + Sync + 'a>>,
}

impl<'a> Summarizer<'a> {
    pub fn new(generator: &'a dyn Generator, config: RunConfig) -> Self {
        Self {
            generator,
            config,
            estimator: &DEFAULT_ESTIMATOR,
            event_handler: &NoopHandler,
            stop_signal: None,
        }
    }

    /// Use a different token estimator for every measurement in the run.
    pub fn with_estimator(mut self, estimator: &'a dyn TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Attach a stop signal. Once it returns `true` no new generation call
    /// starts and the run fails with [`RunError::Cancelled`].
    pub fn with_stop_signal(mut self, signal: impl Fn() -> bool + Send + Sync + 'a) -> Self {
        self.stop_signal = Some(Box::new(signal));
        self
    }

    /// Attach a stop signal only when `condition` holds.
    pub fn with_stop_signal_if(
        self,
        condition: bool,
        signal: impl Fn() -> bool + Send + Sync + 'a,
    ) -> Self {
        if condition { self.with_stop_signal(signal) } else { self }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn stopped(&self) -> bool {
        self.stop_signal.as_ref().is_some_and(|signal| signal())
    }

    /// Summarize `document_text` down to `final_token_target` tokens.
    ///
    /// Every failure carries the statistics gathered up to that point.
    pub async fn run(&self, document_text: &str) -> Result<RunResult, RunFailure> {
        let mut run = RunState::new();
        self.config.validate().map_err(|e| run.fail(e.into()))?;
        let usable = self.config.usable_tokens().map_err(|e| run.fail(e.into()))?;

        let document = Document::new(document_text, self.estimator);
        run.stats.document_tokens = document.tokens();
        if document.is_empty() {
            info!("Document is empty, nothing to summarize");
            run.enter(RunPhase::Done);
            self.event_handler.on_event(&ProgressEvent::Finished {
                final_tokens: 0,
                levels: 0,
            });
            return Ok(run.finish(String::new(), 0));
        }
        info!(
            "Summarizing {} tokens (call ceiling {}, {usable} usable per segment, target {})",
            document.tokens(),
            self.config.call_ceiling(),
            self.config.final_token_target
        );

        let stop = || self.stopped();
        let semaphore = Semaphore::new(self.config.max_concurrency);
        let mut guard = ConvergenceGuard::new(self.config.stall_epsilon);
        let mut input = document.body().clone();
        let mut level: u32 = 0;

        loop {
            if self.stopped() {
                return Err(self.cancel(&mut run, level, None));
            }

            run.enter(RunPhase::Planning(level));
            let segments = plan_segments(&input, &self.config).map_err(|e| run.fail(e.into()))?;
            let input_tokens = input.token_count();
            self.event_handler.on_event(&ProgressEvent::LevelStarted {
                level,
                input_tokens,
                segments_total: segments.len(),
            });

            if level == 0 && input_tokens <= usable {
                debug!("Document fits one call, skipping the map stage");
                let stats = LevelStats {
                    level,
                    input_tokens,
                    segment_count: segments.len(),
                    output_tokens: input_tokens,
                    compression_ratio: 1.0,
                    generation_calls: 0,
                    map_skipped: true,
                    failed_segments: Vec::new(),
                };
                self.record_level(&mut run, stats, segments.len());
                break;
            }

            run.enter(RunPhase::Mapping(level));
            let stage = MapStage {
                generator: self.generator,
                estimator: self.estimator,
                config: &self.config,
                handler: self.event_handler,
                should_stop: &stop,
                semaphore: &semaphore,
            };
            let results = stage.run(level, &segments).await;
            let calls: usize = results.iter().map(|r| r.attempts as usize).sum();
            run.stats.generation_calls += calls;

            run.enter(RunPhase::Reducing(level));
            let outcome = reduce::assemble(&results, self.estimator);
            let ratio = reduce::compression_ratio(input_tokens, outcome.tokens);
            let segments_done = outcome.completed + outcome.failures.len();
            let stats = LevelStats {
                level,
                input_tokens,
                segment_count: segments.len(),
                output_tokens: outcome.tokens,
                compression_ratio: ratio,
                generation_calls: calls,
                map_skipped: false,
                failed_segments: outcome.failures,
            };

            // An unfinished level still goes into the failure's trace.
            if self.stopped() {
                run.stats.levels.push(stats);
                return Err(self.cancel(&mut run, level, Some(outcome.text)));
            }
            if let Some(error) = self.segment_failure(level, &results, outcome.completed) {
                run.stats.levels.push(stats);
                return Err(run.fail(error));
            }
            self.record_level(&mut run, stats, segments_done);

            match reduce::decide(level, outcome.tokens, ratio, &self.config, usable, &mut guard) {
                Decision::Synthesize => {
                    input = TokenizedText::new(outcome.text, self.estimator);
                    break;
                }
                Decision::Recurse => {
                    input = TokenizedText::new(outcome.text, self.estimator);
                    level += 1;
                }
                Decision::Stalled {
                    previous_ratio,
                    latest_ratio,
                } => {
                    return Err(run.fail(RunError::Convergence {
                        level,
                        previous_ratio,
                        latest_ratio,
                    }));
                }
                Decision::DepthExceeded => {
                    let trace = run.stats.levels.clone();
                    return Err(run.fail(RunError::DepthExceeded {
                        max_levels: self.config.max_levels,
                        trace,
                    }));
                }
            }
        }

        if self.stopped() {
            return Err(self.cancel(&mut run, level, Some(input.into_string())));
        }

        run.enter(RunPhase::Synthesizing);
        let target = self.config.final_token_target;
        self.event_handler.on_event(&ProgressEvent::Synthesizing {
            level,
            input_tokens: input.token_count(),
        });
        let synthesis = prompt::synthesis_prompt(input.as_str(), target);
        let attempted = retry_generation(&self.config.retry_config(), stop, || {
            self.generator.generate(&synthesis, target)
        })
        .await;
        run.stats.generation_calls += attempted.attempts as usize;

        let generation = match attempted.result {
            Ok(generation) => generation,
            Err(_) if self.stopped() => {
                return Err(self.cancel(&mut run, level, Some(input.into_string())));
            }
            Err(error) => {
                return Err(run.fail(RunError::Synthesis {
                    attempts: attempted.attempts,
                    error,
                }));
            }
        };
        if let Some(reported) = generation.tokens {
            debug!("Synthesis reported {reported} completion tokens");
        }

        let summary = self.clamp_to_target(generation.text);
        let final_tokens = self.estimator.estimate(&summary);
        run.enter(RunPhase::Done);
        self.event_handler.on_event(&ProgressEvent::Finished {
            final_tokens,
            levels: run.stats.levels.len(),
        });
        Ok(run.finish(summary, final_tokens))
    }

    fn record_level(&self, run: &mut RunState, stats: LevelStats, segments_done: usize) {
        self.event_handler.on_event(&ProgressEvent::LevelCompleted {
            level: stats.level,
            segments_done,
            segments_total: stats.segment_count,
            stats: &stats,
        });
        run.stats.levels.push(stats);
    }

    /// The error to stop on after a level's map stage, if any.
    ///
    /// Without tolerance the first failure is fatal. With tolerance a level
    /// is only fatal when no segment at all produced a summary.
    fn segment_failure(&self, level: u32, results: &[SegmentResult], completed: usize) -> Option<RunError> {
        let (result, error) = results.iter().find_map(|r| match &r.outcome {
            SegmentOutcome::Failed(e) => Some((r, e)),
            _ => None,
        })?;
        if self.config.partial_tolerance && completed > 0 {
            return None;
        }
        Some(RunError::SegmentFailed {
            level,
            index: result.index,
            attempts: result.attempts,
            error: error.clone(),
        })
    }

    fn cancel(&self, run: &mut RunState, level: u32, partial: Option<String>) -> RunFailure {
        self.event_handler.on_event(&ProgressEvent::Cancelled { level });
        if self.config.partial_tolerance {
            run.stats.partial_output = partial.filter(|text| !text.trim().is_empty());
        }
        run.fail(RunError::Cancelled { level })
    }

    /// Cut an over-long final summary at a token boundary.
    fn clamp_to_target(&self, text: String) -> String {
        let target = self.config.final_token_target;
        let tokenized = TokenizedText::new(text, self.estimator);
        if tokenized.token_count() <= target {
            return tokenized.into_string();
        }
        warn!(
            "Final summary ran {} tokens over the {target}-token target, truncating",
            tokenized.token_count() - target
        );
        tokenized.span(0..target).trim_end().to_string()
    }
}

/// Summarize `document_text` with default collaborators.
pub async fn run(
    document_text: &str,
    config: RunConfig,
    generator: &dyn Generator,
) -> Result<RunResult, RunFailure> {
    Summarizer::new(generator, config).run(document_text).await
}

/// Mutable bookkeeping for one run.
struct RunState {
    stats: RunStats,
    phase: RunPhase,
    started: Instant,
}

impl RunState {
    fn new() -> Self {
        Self {
            stats: RunStats::default(),
            phase: RunPhase::Planning(0),
            started: Instant::now(),
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("Run phase: {} -> {phase}", self.phase);
        self.phase = phase;
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn fail(&mut self, error: RunError) -> RunFailure {
        warn!("Run failed while {}: {error}", self.phase);
        self.stats.failed_in = Some(self.phase);
        self.enter(RunPhase::Failed);
        self.stats.elapsed_ms = self.elapsed_ms();
        RunFailure::new(error, self.stats.clone())
    }

    fn finish(mut self, summary: String, final_tokens: usize) -> RunResult {
        self.stats.elapsed_ms = self.elapsed_ms();
        info!(
            "Run finished: {} -> {final_tokens} tokens in {} level(s), {} generation call(s), {}ms",
            self.stats.document_tokens,
            self.stats.levels.len(),
            self.stats.generation_calls,
            self.stats.elapsed_ms
        );
        RunResult::from_stats(summary, final_tokens, self.stats)
    }
}
