//! Shutdown ordering tests
//!
//! Drives the drain protocol against a backend whose writes are held behind
//! a gate, so the pipeline is observed mid-drain:
//! - sources refuse work before the first wait
//! - every accepted event reaches the backend before sinks stop
//! - channels are stopped before any backend is shut down

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use cygnet_gateway::{
    BackendAdapter, BackendConfig, BackendError, Channel, ChannelConfig, Clock, ComponentRegistry,
    DrainCoordinator, DrainPolicy, IncomingRequest, IngestError, LifecycleState, MemoryBackend,
    OverflowPolicy, Pipeline, PipelineConfiguration, PipelineSupervisor, RequestSource, Sink,
    SinkConfig, SinkSettings, SourceConfig, SourceHandle, SourceSettings, TokioClock,
    drain::drain_pipeline,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

const ONE_ROOM: &str = r#"{"contextElements": [{"id": "room1", "type": "Room", "attributes": []}]}"#;

// ============================================================================
// Observers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Wait { pending: usize, source_refused: bool },
    Write(String),
    BackendShutdown { channel: LifecycleState },
}

type Journal = Arc<Mutex<Vec<Entry>>>;

/// Backend whose writes block until the gate opens
struct GatedBackend {
    gate: watch::Receiver<bool>,
    channel: Arc<Channel>,
    journal: Journal,
}

#[async_trait]
impl BackendAdapter for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    async fn write(&self, destination: &str, _payload: Bytes) -> Result<(), BackendError> {
        let mut gate = self.gate.clone();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| BackendError::NotReady)?;
        self.journal.lock().push(Entry::Write(destination.to_string()));
        Ok(())
    }

    async fn create_namespace_if_missing(&self, _path: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn exists(&self, _path: &str) -> bool {
        true
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        self.journal.lock().push(Entry::BackendShutdown {
            channel: self.channel.state(),
        });
        Ok(())
    }
}

/// Clock that probes the pipeline on every wait and opens the gate on the second
struct ProbingClock {
    journal: Journal,
    channel: Arc<Channel>,
    source: SourceHandle,
    gate: watch::Sender<bool>,
    waits: AtomicUsize,
}

#[async_trait]
impl Clock for ProbingClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        let refused = matches!(
            self.source.submit(IncomingRequest::new(ONE_ROOM)).await,
            Err(IngestError::Stopped(_))
        );
        self.journal.lock().push(Entry::Wait {
            pending: self.channel.pending(),
            source_refused: refused,
        });
        if self.waits.fetch_add(1, Ordering::SeqCst) == 1 {
            let _ = self.gate.send(true);
        }
        tokio::time::sleep(duration).await;
    }
}

// ============================================================================
// Protocol ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn drain_waits_for_gated_events_then_stops_downstream() {
    let journal: Journal = Arc::default();
    let (gate_tx, gate_rx) = watch::channel(false);

    let channel = Arc::new(Channel::new("main", 16, OverflowPolicy::Block));
    let backend = Arc::new(GatedBackend {
        gate: gate_rx,
        channel: channel.clone(),
        journal: journal.clone(),
    });
    let source = RequestSource::new("http", SourceSettings::default(), vec![channel.clone()]);
    let handle = source.handle();
    let sink = Sink::new("gated", channel.clone(), backend, SinkSettings::default());
    let pipeline = Pipeline::new(vec![source], vec![channel.clone()], vec![sink]);
    pipeline.start().await.unwrap();

    for _ in 0..3 {
        handle.submit(IncomingRequest::new(ONE_ROOM)).await.unwrap();
    }
    assert_eq!(channel.pending(), 3);

    let clock = ProbingClock {
        journal: journal.clone(),
        channel: channel.clone(),
        source: handle.clone(),
        gate: gate_tx,
        waits: AtomicUsize::new(0),
    };
    let report = drain_pipeline(&pipeline, &DrainPolicy::default(), &clock).await;

    assert!(report.is_drained());
    assert_eq!(report.pending_per_poll, vec![3, 3, 0]);
    assert_eq!(report.waited, Duration::from_secs(10));

    let entries = journal.lock().clone();
    assert_eq!(
        entries,
        vec![
            Entry::Wait {
                pending: 3,
                source_refused: true
            },
            Entry::Wait {
                pending: 3,
                source_refused: true
            },
            Entry::Write("room1_Room".into()),
            Entry::Write("room1_Room".into()),
            Entry::Write("room1_Room".into()),
            Entry::BackendShutdown {
                channel: LifecycleState::Stopped
            },
        ]
    );
    assert!(pipeline.statuses().iter().all(|s| s.state == LifecycleState::Stopped));
}

// ============================================================================
// Coordinator against a supervisor
// ============================================================================

#[tokio::test(start_paused = true)]
async fn coordinator_persists_everything_accepted() {
    let backend = Arc::new(MemoryBackend::new());
    let mut registry = ComponentRegistry::new();
    let shared = backend.clone();
    registry.register_backend("shared", move |_| Ok(shared.clone() as Arc<dyn BackendAdapter>));

    let supervisor = PipelineSupervisor::new(registry);
    supervisor
        .apply_configuration(
            PipelineConfiguration::new()
                .source("http", SourceConfig::new(["main"]))
                .channel("main", ChannelConfig::new(100))
                .sink("out", SinkConfig::new("main", BackendConfig::new("shared"))),
        )
        .await
        .unwrap();

    backend.fail_next_writes(4);
    let ingress = supervisor.ingress();
    for _ in 0..10 {
        ingress.submit("http", IncomingRequest::new(ONE_ROOM)).await.unwrap();
    }

    let report = DrainCoordinator::new(supervisor.handle())
        .with_policy(DrainPolicy::fixed(Duration::from_millis(500)))
        .with_clock(Arc::new(TokioClock))
        .run()
        .await
        .unwrap();

    assert!(report.is_drained());
    assert_eq!(report.pending_per_poll.last(), Some(&0));
    assert_eq!(backend.records().len(), 10);
    assert!(backend.is_shut_down());

    let snapshot = supervisor.snapshot();
    assert!(snapshot.shutting_down);
    assert!(snapshot.components.iter().all(|c| c.state == LifecycleState::Stopped));
    assert_eq!(
        ingress.submit("http", IncomingRequest::new(ONE_ROOM)).await,
        Err(IngestError::Stopped("http".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn coordinator_without_pipeline_is_a_no_op() {
    let supervisor = PipelineSupervisor::new(ComponentRegistry::with_builtin());
    let report = DrainCoordinator::new(supervisor.handle()).run().await.unwrap();
    assert!(report.is_drained());
    assert_eq!(report.polls(), 0);
}
