//! Background tag inference over partial transcripts.
//!
//! At most one task is authoritative at a time. A newer trigger supersedes
//! the running task without killing it; its result arrives on a oneshot
//! nobody listens to any more and is dropped. Finalize is the only place that
//! waits, and that wait is bounded.

use crate::content::content_units;
use crate::{CacheState, SpeculativeCache, SpeculativeCacheEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tag_corpus::TargetTagSet;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voice_infer::{CollaboratorError, TagInferencer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculativeConfig {
    /// Minimum [`content_units`] before a partial transcript is worth a trigger.
    pub min_content_units: usize,
    /// Reuse threshold for the final-vs-speculative similarity ratio.
    pub similarity_threshold: f64,
    pub await_timeout_ms: u64,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            min_content_units: 5,
            similarity_threshold: 0.7,
            await_timeout_ms: 5_000,
        }
    }
}

impl SpeculativeConfig {
    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    BelowThreshold { units: usize },
    /// The cache already holds (or is computing) this exact text.
    AlreadyRunning { generation: u64 },
    Started { generation: u64 },
    /// Started a new generation; the previous one will be discarded.
    Superseded { generation: u64, previous: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AwaitOutcome {
    Ready(TargetTagSet),
    Failed(String),
    Timeout,
    NoTask,
}

/// A background task that delivered its outcome into the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Ready {
        generation: u64,
        text: String,
        tags: TargetTagSet,
    },
    Failed {
        generation: u64,
        detail: String,
    },
}

type InferenceResult = Result<TargetTagSet, CollaboratorError>;

struct InFlight {
    generation: u64,
    rx: oneshot::Receiver<InferenceResult>,
    token: CancellationToken,
}

pub struct SpeculativeScheduler {
    inferencer: Arc<dyn TagInferencer>,
    config: SpeculativeConfig,
    cache: SpeculativeCache,
    inflight: Option<InFlight>,
    root: CancellationToken,
    started: usize,
}

impl SpeculativeScheduler {
    pub fn new(inferencer: Arc<dyn TagInferencer>, config: SpeculativeConfig) -> Self {
        Self {
            inferencer,
            config,
            cache: SpeculativeCache::new(),
            inflight: None,
            root: CancellationToken::new(),
            started: 0,
        }
    }

    pub fn config(&self) -> &SpeculativeConfig {
        &self.config
    }

    pub fn entry(&self) -> Option<&SpeculativeCacheEntry> {
        self.cache.entry()
    }

    /// Number of background tasks spawned so far.
    pub fn started(&self) -> usize {
        self.started
    }

    pub fn is_pending(&self) -> bool {
        self.inflight.is_some()
    }

    /// Start background inference over `text` unless it is too short or
    /// already cached. Must be called from within a tokio runtime.
    pub fn trigger(&mut self, text: &str) -> TriggerOutcome {
        let units = content_units(text);
        if units < self.config.min_content_units {
            return TriggerOutcome::BelowThreshold { units };
        }
        if let Some(entry) = self.cache.entry() {
            if entry.text == text && !matches!(entry.state, CacheState::TimedOut) {
                return TriggerOutcome::AlreadyRunning {
                    generation: entry.generation,
                };
            }
        }

        // Superseded work keeps running; its receiver is dropped so the
        // result has nowhere to go.
        let previous = self.inflight.take().map(|old| old.generation);
        let generation = self.cache.begin(text);
        self.spawn(generation, text.to_string());
        self.started += 1;

        match previous {
            Some(previous) => {
                info!(generation, previous, units, "speculative inference superseded");
                TriggerOutcome::Superseded {
                    generation,
                    previous,
                }
            }
            None => {
                info!(generation, units, "speculative inference started");
                TriggerOutcome::Started { generation }
            }
        }
    }

    fn spawn(&mut self, generation: u64, text: String) {
        let (tx, rx) = oneshot::channel();
        let token = self.root.child_token();
        let task_token = token.clone();
        let inferencer = Arc::clone(&self.inferencer);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = task_token.cancelled() => {
                    debug!(generation, "speculative inference cancelled");
                    return;
                }
                outcome = inferencer.infer(&text) => outcome,
            };
            if tx.send(outcome).is_err() {
                debug!(generation, "stale speculative result discarded");
            }
        });

        self.inflight = Some(InFlight {
            generation,
            rx,
            token,
        });
    }

    /// `received` is `None` when the task ended without sending.
    fn settle(&mut self, generation: u64, received: Option<InferenceResult>) -> Completion {
        self.inflight = None;
        let outcome = match received {
            Some(Ok(tags)) => Ok(tags),
            Some(Err(e)) => {
                warn!(generation, error = %e, "speculative inference failed");
                Err(e.to_string())
            }
            None => Err("speculative task ended without a result".to_string()),
        };
        self.cache.complete(generation, outcome.clone());
        match outcome {
            Ok(tags) => Completion::Ready {
                generation,
                text: self
                    .cache
                    .entry()
                    .map(|e| e.text.clone())
                    .unwrap_or_default(),
                tags,
            },
            Err(detail) => Completion::Failed { generation, detail },
        }
    }

    /// Non-blocking check for a finished background task.
    pub fn try_poll(&mut self) -> Option<Completion> {
        let inflight = self.inflight.as_mut()?;
        let generation = inflight.generation;
        let received = match inflight.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => None,
        };
        Some(self.settle(generation, received))
    }

    /// Resolve when the in-flight task finishes; never resolves when nothing
    /// is in flight. Cancel-safe, for use as a `select!` branch.
    pub async fn next_completion(&mut self) -> Completion {
        let Some(inflight) = self.inflight.as_mut() else {
            return std::future::pending().await;
        };
        let generation = inflight.generation;
        let received = (&mut inflight.rx).await.ok();
        self.settle(generation, received)
    }

    /// Wait for the speculative result at finalize time, never longer than
    /// `timeout`. A timed-out entry is sealed so a late result cannot land.
    pub async fn await_result(&mut self, timeout: Duration) -> AwaitOutcome {
        if let Some(inflight) = self.inflight.as_mut() {
            let generation = inflight.generation;
            let waited = tokio::time::timeout(timeout, &mut inflight.rx).await;
            match waited {
                Ok(received) => {
                    self.settle(generation, received.ok());
                }
                Err(_) => {
                    warn!(
                        generation,
                        timeout_ms = timeout.as_millis() as u64,
                        "speculative inference timed out"
                    );
                    if let Some(stalled) = self.inflight.take() {
                        stalled.token.cancel();
                    }
                    self.cache.mark_timed_out(generation);
                    return AwaitOutcome::Timeout;
                }
            }
        }

        match self.cache.entry().map(|e| &e.state) {
            None => AwaitOutcome::NoTask,
            Some(CacheState::Ready(tags)) => AwaitOutcome::Ready(tags.clone()),
            Some(CacheState::Failed(detail)) => AwaitOutcome::Failed(detail.clone()),
            Some(CacheState::TimedOut) => AwaitOutcome::Timeout,
            // inflight is gone, so a pending entry can only mean a lost task
            Some(CacheState::Pending) => AwaitOutcome::Failed("speculative task lost".to_string()),
        }
    }

    /// Stop the in-flight task; its entry is recorded as failed.
    pub fn cancel(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            debug!(generation = inflight.generation, "cancelling speculative inference");
            inflight.token.cancel();
            self.cache
                .complete(inflight.generation, Err("cancelled".to_string()));
        }
    }

    /// Cancel and forget everything.
    pub fn reset(&mut self) {
        self.cancel();
        self.cache.clear();
    }
}

impl Drop for SpeculativeScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tag_corpus::vocabulary::EMOTION;
    use tokio::time::Instant;

    /// Counts calls, sleeps for `delay`, and fails on texts containing "fail".
    struct CountingTagger {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingTagger {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TagInferencer for CountingTagger {
        async fn infer(&self, text: &str) -> voice_infer::Result<TargetTagSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if text.contains("fail") {
                return Err(CollaboratorError::Failed("backend exploded".into()));
            }
            Ok(TargetTagSet::new(text).with_tags(EMOTION, ["hungry"]))
        }
    }

    fn scheduler(tagger: &Arc<CountingTagger>) -> SpeculativeScheduler {
        SpeculativeScheduler::new(tagger.clone(), SpeculativeConfig::default())
    }

    const TEXT: &str = "I am very hungry now";

    #[tokio::test(start_paused = true)]
    async fn test_short_text_does_not_trigger() {
        let tagger = CountingTagger::new(Duration::ZERO);
        let mut s = scheduler(&tagger);
        assert_eq!(
            s.trigger("hello there"),
            TriggerOutcome::BelowThreshold { units: 2 }
        );
        assert_eq!(s.await_result(Duration::from_secs(5)).await, AwaitOutcome::NoTask);
        assert_eq!(tagger.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_then_await() {
        let tagger = CountingTagger::new(Duration::from_millis(800));
        let mut s = scheduler(&tagger);
        assert_eq!(s.trigger(TEXT), TriggerOutcome::Started { generation: 1 });
        assert!(s.is_pending());

        match s.await_result(Duration::from_secs(5)).await {
            AwaitOutcome::Ready(tags) => assert_eq!(tags.rationale, TEXT),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!s.is_pending());
        assert_eq!(tagger.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_text_triggers_once() {
        let tagger = CountingTagger::new(Duration::from_millis(100));
        let mut s = scheduler(&tagger);
        s.trigger(TEXT);
        for _ in 0..3 {
            assert_eq!(
                s.trigger(TEXT),
                TriggerOutcome::AlreadyRunning { generation: 1 }
            );
        }
        s.await_result(Duration::from_secs(5)).await;
        assert_eq!(s.trigger(TEXT), TriggerOutcome::AlreadyRunning { generation: 1 });
        assert_eq!(tagger.calls(), 1);
        assert_eq!(s.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_task_times_out_within_bound() {
        let tagger = CountingTagger::new(Duration::from_secs(3600));
        let mut s = scheduler(&tagger);
        s.trigger(TEXT);

        let start = Instant::now();
        let outcome = s.await_result(Duration::from_secs(5)).await;
        assert_eq!(outcome, AwaitOutcome::Timeout);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5_010));
        assert_eq!(s.entry().unwrap().state, CacheState::TimedOut);

        // the sealed entry stays timed out even long after
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(s.try_poll().is_none());
        assert_eq!(s.entry().unwrap().state, CacheState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_recorded_not_raised() {
        let tagger = CountingTagger::new(Duration::from_millis(10));
        let mut s = scheduler(&tagger);
        s.trigger("please fail on this one");
        match s.await_result(Duration::from_secs(5)).await {
            AwaitOutcome::Failed(detail) => assert!(detail.contains("backend exploded")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(s.entry().unwrap().state, CacheState::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_trigger_supersedes() {
        let tagger = CountingTagger::new(Duration::from_secs(1));
        let mut s = scheduler(&tagger);
        s.trigger("one two three four five");
        let outcome = s.trigger("one two three four five six");
        assert_eq!(
            outcome,
            TriggerOutcome::Superseded {
                generation: 2,
                previous: 1
            }
        );

        match s.await_result(Duration::from_secs(5)).await {
            AwaitOutcome::Ready(tags) => assert_eq!(tags.rationale, "one two three four five six"),
            other => panic!("unexpected {other:?}"),
        }
        let entry = s.entry().unwrap();
        assert_eq!(entry.generation, 2);
        assert_eq!(tagger.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_completion_and_try_poll() {
        let tagger = CountingTagger::new(Duration::from_millis(500));
        let mut s = scheduler(&tagger);
        s.trigger(TEXT);
        assert!(s.try_poll().is_none());

        match s.next_completion().await {
            Completion::Ready { generation, text, .. } => {
                assert_eq!(generation, 1);
                assert_eq!(text, TEXT);
            }
            other => panic!("unexpected {other:?}"),
        }
        // nothing in flight any more: never resolves
        let idle = tokio::time::timeout(Duration::from_secs(60), s.next_completion()).await;
        assert!(idle.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_and_clears() {
        let tagger = CountingTagger::new(Duration::from_secs(10));
        let mut s = scheduler(&tagger);
        s.trigger(TEXT);
        tokio::task::yield_now().await;
        s.reset();
        assert!(s.entry().is_none());
        assert!(!s.is_pending());
        assert_eq!(s.await_result(Duration::from_secs(5)).await, AwaitOutcome::NoTask);
    }
}
