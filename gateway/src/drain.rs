//! Graceful shutdown drain
//!
//! Stopping a pipeline without losing accepted events:
//!
//! 1. stop every source, so nothing new enters a channel
//! 2. poll every channel until one poll sees all of them at zero pending
//! 3. stop every channel, then every sink
//!
//! Sinks keep consuming during step 2. A channel only reads zero once its
//! sink has committed every event, so everything accepted before step 1
//! has been handed to a backend by the time step 3 runs.
//!
//! The wait in step 2 has no bound unless [`DrainPolicy::max_wait`] is set.
//! Past that bound the remaining events are abandoned and logged.

use crate::backoff::BackoffConfig;
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::pipeline::Pipeline;
use crate::supervisor::SupervisorHandle;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Time source for the drain loop
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Poll schedule and optional bound of the drain wait
#[derive(Debug, Clone, PartialEq)]
pub struct DrainPolicy {
    /// Delay between polls
    pub backoff: BackoffConfig,
    /// Give up waiting after this long; `None` waits forever
    pub max_wait: Option<Duration>,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl DrainPolicy {
    /// Poll every `interval`, forever
    pub fn fixed(interval: Duration) -> Self {
        Self {
            backoff: BackoffConfig::fixed(interval),
            max_wait: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

/// How the wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// One poll saw every channel empty
    Drained,
    /// `max_wait` ran out; these channels still held events
    Abandoned { pending: Vec<(String, usize)> },
}

/// What a drain did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    /// Total pending across all channels, per poll
    pub pending_per_poll: Vec<usize>,
    pub waited: Duration,
    pub source_failures: usize,
    pub sink_failures: usize,
}

impl DrainReport {
    pub fn polls(&self) -> usize {
        self.pending_per_poll.len()
    }

    pub fn is_drained(&self) -> bool {
        self.outcome == DrainOutcome::Drained
    }
}

/// Run the three-step stop protocol on one pipeline
pub async fn drain_pipeline(pipeline: &Pipeline, policy: &DrainPolicy, clock: &dyn Clock) -> DrainReport {
    let started = clock.now();

    let source_failures = pipeline.stop_sources().await;
    info!(
        sources = pipeline.sources().len(),
        failures = source_failures,
        "Sources stopped, waiting for channels to drain"
    );

    let mut pending_per_poll = Vec::new();
    let outcome = loop {
        let pending = pipeline.pending();
        let total: usize = pending.iter().map(|(_, n)| n).sum();
        pending_per_poll.push(total);
        if let Some(metrics) = Metrics::get() {
            metrics.inc_drain_polls();
        }

        if total == 0 {
            info!(polls = pending_per_poll.len(), "All channels drained");
            break DrainOutcome::Drained;
        }

        let stalled: Vec<(String, usize)> = pending.into_iter().filter(|(_, n)| *n > 0).collect();
        for (channel, n) in &stalled {
            info!(channel = %channel, pending = n, "Waiting for channel to drain");
        }

        let waited = clock.now().saturating_duration_since(started);
        let mut delay = policy.backoff.delay_for_attempt(pending_per_poll.len() as u32);
        if let Some(max_wait) = policy.max_wait {
            if waited >= max_wait {
                for (channel, n) in &stalled {
                    error!(channel = %channel, pending = n, "Drain wait exceeded, abandoning events");
                }
                break DrainOutcome::Abandoned { pending: stalled };
            }
            delay = delay.min(max_wait - waited);
        }
        clock.sleep(delay).await;
    };

    pipeline.stop_channels();
    let sink_failures = pipeline.stop_sinks().await;
    let waited = clock.now().saturating_duration_since(started);
    info!(
        waited_ms = waited.as_millis() as u64,
        sink_failures,
        drained = outcome == DrainOutcome::Drained,
        "Channels and sinks stopped"
    );

    DrainReport {
        outcome,
        pending_per_poll,
        waited,
        source_failures,
        sink_failures,
    }
}

/// One-shot shutdown of the supervisor's active pipeline
///
/// `run` consumes the coordinator. It waits for any configuration being
/// applied to finish, then closes the supervisor to further configurations
/// before draining.
pub struct DrainCoordinator {
    handle: SupervisorHandle,
    policy: DrainPolicy,
    clock: Arc<dyn Clock>,
}

impl DrainCoordinator {
    pub fn new(handle: SupervisorHandle) -> Self {
        Self {
            handle,
            policy: DrainPolicy::default(),
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_policy(mut self, policy: DrainPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Drain and stop the active pipeline
    ///
    /// Fails with [`GatewayError::ShuttingDown`] if another coordinator
    /// already ran against the same supervisor.
    pub async fn run(self) -> Result<DrainReport, GatewayError> {
        let Some(active) = self.handle.begin_shutdown().await? else {
            info!("No active pipeline, nothing to drain");
            return Ok(DrainReport {
                outcome: DrainOutcome::Drained,
                pending_per_poll: Vec::new(),
                waited: Duration::ZERO,
                source_failures: 0,
                sink_failures: 0,
            });
        };

        info!(generation = active.generation(), "Shutdown started");
        let report = drain_pipeline(active.pipeline(), &self.policy, self.clock.as_ref()).await;
        if report.is_drained() {
            info!(polls = report.polls(), "Shutdown complete");
        } else {
            warn!(polls = report.polls(), "Shutdown complete with abandoned events");
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::channel::{Channel, OverflowPolicy};
    use crate::sink::{Sink, SinkSettings};
    use crate::source::{IncomingRequest, RequestSource, SourceSettings};
    use cygnet_core::LifecycleState;
    use parking_lot::Mutex;

    const ONE_ROOM: &str = r#"{"contextElements": [{"id": "r1", "type": "Room", "attributes": []}]}"#;

    /// Clock that records every requested sleep and advances tokio time
    #[derive(Default)]
    struct RecordingClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        fn now(&self) -> Instant {
            tokio::time::Instant::now().into_std()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().push(duration);
            tokio::time::sleep(duration).await;
        }
    }

    async fn started(backend: Arc<MemoryBackend>) -> Pipeline {
        let ch = Arc::new(Channel::new("main", 16, OverflowPolicy::Block));
        let source = RequestSource::new("http", SourceSettings::default(), vec![ch.clone()]);
        let sink = Sink::new("mem", ch.clone(), backend, SinkSettings::default());
        let pipeline = Pipeline::new(vec![source], vec![ch], vec![sink]);
        pipeline.start().await.unwrap();
        pipeline
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pipeline_drains_on_first_poll() {
        let pipeline = started(Arc::new(MemoryBackend::new())).await;
        let clock = RecordingClock::default();

        let report = drain_pipeline(&pipeline, &DrainPolicy::default(), &clock).await;
        assert!(report.is_drained());
        assert_eq!(report.pending_per_poll, vec![0]);
        assert!(clock.sleeps.lock().is_empty());
        assert!(pipeline.statuses().iter().all(|s| s.state == LifecycleState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_sink_progress() {
        let backend = Arc::new(MemoryBackend::new());
        // every write fails until the backend recovers
        backend.fail_next_writes(usize::MAX);
        let pipeline = started(backend.clone()).await;
        let handle = pipeline.source("http").unwrap().handle();
        for _ in 0..3 {
            handle.submit(IncomingRequest::new(ONE_ROOM)).await.unwrap();
        }

        let recover = {
            let backend = backend.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(12)).await;
                backend.fail_next_writes(0);
            })
        };

        let clock = RecordingClock::default();
        let report = drain_pipeline(&pipeline, &DrainPolicy::default(), &clock).await;
        recover.await.unwrap();

        assert!(report.is_drained());
        assert_eq!(report.pending_per_poll.first(), Some(&3));
        assert_eq!(report.pending_per_poll.last(), Some(&0));
        assert!(report.polls() >= 3);
        assert!(clock.sleeps.lock().iter().all(|d| *d == Duration::from_secs(5)));
        assert_eq!(backend.records().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_abandons() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next_writes(usize::MAX);
        let pipeline = started(backend.clone()).await;
        pipeline
            .source("http")
            .unwrap()
            .handle()
            .submit(IncomingRequest::new(ONE_ROOM))
            .await
            .unwrap();

        let policy = DrainPolicy::fixed(Duration::from_secs(5)).with_max_wait(Duration::from_secs(12));
        let clock = RecordingClock::default();
        let report = drain_pipeline(&pipeline, &policy, &clock).await;

        assert_eq!(
            report.outcome,
            DrainOutcome::Abandoned {
                pending: vec![("main".to_string(), 1)]
            }
        );
        assert_eq!(
            *clock.sleeps.lock(),
            vec![Duration::from_secs(5), Duration::from_secs(5), Duration::from_secs(2)]
        );
        assert!(backend.records().is_empty());
        assert!(pipeline.statuses().iter().all(|s| s.state == LifecycleState::Stopped));
    }

    #[test]
    fn test_default_policy_is_unbounded_five_seconds() {
        let policy = DrainPolicy::default();
        assert_eq!(policy.max_wait, None);
        assert_eq!(policy.backoff.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.backoff.delay_for_attempt(10), Duration::from_secs(5));
    }
}
