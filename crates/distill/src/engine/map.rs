//! Map stage: summarize every segment of a level concurrently.
//!
//! Segments are dispatched together and gated by a semaphore, so at most
//! `max_concurrency` generation calls are in flight. Completion order is
//! arbitrary; results are re-sorted by segment index before they leave this
//! module.
//!
//! Two flags stop new work from being dispatched: the caller's stop signal,
//! and an internal abort flag raised by the first permanent failure when
//! `partial_tolerance` is off. Calls already in flight run to completion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::config::RunConfig;
use super::events::{EventHandler, ProgressEvent};
use super::plan::Segment;
use super::prompt;
use crate::api::retry::retry_generation;
use crate::api::{GenerateError, Generator};
use crate::text::TokenEstimator;

/// What happened to one segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Summary { text: String, tokens: usize },
    Failed(GenerateError),
    /// Never dispatched: the run was cancelled or aborted first.
    NotStarted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub index: usize,
    /// Generation calls made for this segment, retries included.
    pub attempts: u32,
    pub outcome: SegmentOutcome,
}

impl SegmentResult {
    fn not_started(index: usize) -> Self {
        Self {
            index,
            attempts: 0,
            outcome: SegmentOutcome::NotStarted,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, SegmentOutcome::Failed(_))
    }
}

/// Everything the map stage borrows from the run controller.
pub(crate) struct MapStage<'a> {
    pub generator: &'a dyn Generator,
    pub estimator: &'a dyn TokenEstimator,
    pub config: &'a RunConfig,
    pub handler: &'a dyn EventHandler,
    pub should_stop: &'a (dyn Fn() -> bool + Send + Sync),
    pub semaphore: &'a Semaphore,
}

impl MapStage<'_> {
    /// Summarize `segments`, returning one result per segment in index order.
    pub async fn run(&self, level: u32, segments: &[Segment]) -> Vec<SegmentResult> {
        let total = segments.len();
        let retry = self.config.retry_config();
        let done = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);

        let futures: Vec<_> = segments
            .iter()
            .map(|segment| {
                let retry = &retry;
                let done = &done;
                let abort = &abort;
                async move {
                    let halted = || abort.load(Ordering::SeqCst) || (self.should_stop)();
                    if halted() {
                        return SegmentResult::not_started(segment.index);
                    }
                    let Ok(_permit) = self.semaphore.acquire().await else {
                        return SegmentResult::not_started(segment.index);
                    };
                    // Waiting for a permit can take a while; look again.
                    if halted() {
                        return SegmentResult::not_started(segment.index);
                    }

                    let hint = self.config.map_output_hint(segment.core_tokens());
                    let prompt = prompt::segment_prompt(level, segment, total, hint);
                    let attempted = retry_generation(retry, halted, || {
                        self.generator.generate(&prompt, hint)
                    })
                    .await;

                    let outcome = match attempted.result {
                        Ok(generation) => {
                            let tokens = self.estimator.estimate(&generation.text);
                            SegmentOutcome::Summary {
                                text: generation.text,
                                tokens,
                            }
                        }
                        Err(e) => {
                            warn!(
                                "[level {level}] segment {} failed after {} attempt(s): {e}",
                                segment.index, attempted.attempts
                            );
                            if !self.config.partial_tolerance {
                                abort.store(true, Ordering::SeqCst);
                            }
                            SegmentOutcome::Failed(e)
                        }
                    };
                    let result = SegmentResult {
                        index: segment.index,
                        attempts: attempted.attempts,
                        outcome,
                    };

                    let segments_done = done.fetch_add(1, Ordering::SeqCst) + 1;
                    self.handler.on_event(&ProgressEvent::SegmentCompleted {
                        level,
                        index: segment.index,
                        segments_done,
                        segments_total: total,
                        failed: result.is_failed(),
                    });
                    result
                }
            })
            .collect();

        let mut results = futures::future::join_all(futures).await;
        results.sort_by_key(|r| r.index);
        debug!(
            "[level {level}] map stage finished: {}/{total} segment(s) completed",
            done.load(Ordering::SeqCst)
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FnGenerator, Generation};
    use crate::engine::events::NoopHandler;
    use crate::engine::plan_segments;
    use crate::text::{TokenizedText, WordEstimator};
    use std::sync::Arc;
    use std::time::Duration;

    fn segments(words: usize, limit: usize) -> Vec<Segment> {
        let text = (0..words).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let input = TokenizedText::new(text, &WordEstimator);
        plan_segments(&input, &RunConfig::new(limit, 10).with_overlap_tokens(0)).unwrap()
    }

    fn config(concurrency: usize) -> RunConfig {
        RunConfig::new(100, 10)
            .with_overlap_tokens(0)
            .with_max_concurrency(concurrency)
            .with_retry_backoff(Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let generator = FnGenerator::new(move |_prompt, _max| {
            let (f, p) = (Arc::clone(&f), Arc::clone(&p));
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                Ok(Generation::new("ok"))
            }
        });
        let cfg = config(2);
        let semaphore = Semaphore::new(cfg.max_concurrency);
        let stage = MapStage {
            generator: &generator,
            estimator: &WordEstimator,
            config: &cfg,
            handler: &NoopHandler,
            should_stop: &|| false,
            semaphore: &semaphore,
        };
        let results = stage.run(0, &segments(400, 100)).await;
        assert_eq!(results.len(), 5);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(results.iter().all(|r| !r.is_failed()));
    }

    #[tokio::test]
    async fn results_are_sorted_by_index() {
        // Later segments finish first.
        let generator = FnGenerator::new(|prompt: String, _max| async move {
            let section: u64 = prompt
                .split("[Section ")
                .nth(1)
                .and_then(|s| s.split(' ').next())
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(section * 10))).await;
            Ok(Generation::new(format!("s{section}")))
        });
        let cfg = config(8);
        let semaphore = Semaphore::new(cfg.max_concurrency);
        let stage = MapStage {
            generator: &generator,
            estimator: &WordEstimator,
            config: &cfg,
            handler: &NoopHandler,
            should_stop: &|| false,
            semaphore: &semaphore,
        };
        let results = stage.run(0, &segments(300, 100)).await;
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(
            results[3].outcome,
            SegmentOutcome::Summary {
                text: "s4".into(),
                tokens: 1
            }
        );
    }

    #[tokio::test]
    async fn permanent_failure_stops_dispatch_without_tolerance() {
        let generator = FnGenerator::new(|_prompt, _max| async move {
            Err::<Generation, _>(GenerateError::Permanent("rejected".into()))
        });
        let cfg = config(1);
        let semaphore = Semaphore::new(cfg.max_concurrency);
        let stage = MapStage {
            generator: &generator,
            estimator: &WordEstimator,
            config: &cfg,
            handler: &NoopHandler,
            should_stop: &|| false,
            semaphore: &semaphore,
        };
        let results = stage.run(0, &segments(400, 100)).await;
        assert!(results[0].is_failed());
        assert_eq!(results[0].attempts, 1);
        assert!(
            results[1..]
                .iter()
                .all(|r| r.outcome == SegmentOutcome::NotStarted)
        );
    }
}
