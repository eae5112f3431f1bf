//! Pipeline supervisor
//!
//! Owns the active [`Pipeline`] and replaces it whole when a new
//! [`PipelineConfiguration`] arrives:
//!
//! ```text
//! config ──► validate ──► materialize ──► start sinks, channels, sources
//!                                              │
//!                            failed ◄──────────┼──────────► publish (generation + 1)
//!                      (stop new, keep old)                   │
//!                                                             ▼
//!                                               retire old with the drain protocol
//! ```
//!
//! Applications are serialized by an async lock. The active pipeline is
//! only replaced after the new one is fully running, so readers never see
//! a half-applied configuration.

use crate::config::{ConfigurationProvider, PipelineConfiguration};
use crate::drain::{Clock, DrainPolicy, TokioClock, drain_pipeline};
use crate::error::{GatewayError, IngestError};
use crate::metrics::Metrics;
use crate::pipeline::{ComponentStatus, Pipeline};
use crate::registry::ComponentRegistry;
use crate::source::IncomingRequest;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// A running pipeline and the configuration it was built from
pub struct ActivePipeline {
    generation: u64,
    pipeline: Pipeline,
    configuration: PipelineConfiguration,
}

impl ActivePipeline {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn configuration(&self) -> &PipelineConfiguration {
        &self.configuration
    }
}

/// Read-only view of the owned components
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    /// Number of configurations applied so far; 0 before the first
    pub generation: u64,
    pub shutting_down: bool,
    pub components: Vec<ComponentStatus>,
}

impl PipelineSnapshot {
    pub fn component(&self, name: &str) -> Option<&ComponentStatus> {
        self.components.iter().find(|c| c.name == name)
    }
}

struct ApplyState {
    generation: u64,
}

struct Shared {
    registry: ComponentRegistry,
    apply: Mutex<ApplyState>,
    active: RwLock<Option<Arc<ActivePipeline>>>,
    /// Only set while holding `apply`
    shutting_down: AtomicBool,
    retire_policy: DrainPolicy,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn active(&self) -> Option<Arc<ActivePipeline>> {
        self.active.read().clone()
    }

    fn snapshot(&self) -> PipelineSnapshot {
        let active = self.active();
        PipelineSnapshot {
            generation: active.as_ref().map_or(0, |a| a.generation),
            shutting_down: self.shutting_down.load(Ordering::Acquire),
            components: active.map(|a| a.pipeline.statuses()).unwrap_or_default(),
        }
    }
}

/// Builds, swaps and tears down pipelines
#[derive(Clone)]
pub struct PipelineSupervisor {
    shared: Arc<Shared>,
}

impl PipelineSupervisor {
    /// Supervisor that retires old pipelines with the default drain policy
    pub fn new(registry: ComponentRegistry) -> Self {
        Self::with_retire_policy(registry, DrainPolicy::default(), Arc::new(TokioClock))
    }

    /// Supervisor with an explicit drain policy for retiring pipelines
    pub fn with_retire_policy(
        registry: ComponentRegistry,
        retire_policy: DrainPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                apply: Mutex::new(ApplyState { generation: 0 }),
                active: RwLock::new(None),
                shutting_down: AtomicBool::new(false),
                retire_policy,
                clock,
            }),
        }
    }

    /// Replace the active pipeline with one built from `config`
    ///
    /// Returns the new generation. On any error the previous pipeline stays
    /// active and untouched.
    pub async fn apply_configuration(&self, config: PipelineConfiguration) -> Result<u64, GatewayError> {
        let mut state = self.shared.apply.lock().await;
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(GatewayError::ShuttingDown);
        }

        let result = self.build_and_start(&config).await;
        let pipeline = match result {
            Ok(pipeline) => pipeline,
            Err(e) => {
                if let Some(metrics) = Metrics::get() {
                    metrics.record_config("failed");
                }
                error!(error = %e, generation = state.generation, "Configuration not applied, previous pipeline stays active");
                return Err(e);
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let next = Arc::new(ActivePipeline {
            generation,
            pipeline,
            configuration: config,
        });
        let previous = self.shared.active.write().replace(next);
        if let Some(metrics) = Metrics::get() {
            metrics.record_config("applied");
        }
        info!(generation, "Configuration applied");

        if let Some(previous) = previous {
            info!(generation = previous.generation, "Retiring previous pipeline");
            let report = drain_pipeline(
                &previous.pipeline,
                &self.shared.retire_policy,
                self.shared.clock.as_ref(),
            )
            .await;
            if !report.is_drained() {
                warn!(generation = previous.generation, outcome = ?report.outcome, "Previous pipeline retired with pending events");
            }
        }

        Ok(generation)
    }

    async fn build_and_start(&self, config: &PipelineConfiguration) -> Result<Pipeline, GatewayError> {
        let pipeline = self.shared.registry.materialize(config)?;
        pipeline.start().await?;
        Ok(pipeline)
    }

    /// Apply every configuration `provider` emits, one at a time
    ///
    /// Rejected configurations are logged and skipped. Returns when the
    /// provider is exhausted or shutdown has begun.
    pub async fn run<P: ConfigurationProvider>(&self, mut provider: P) {
        while let Some(config) = provider.next_configuration().await {
            match self.apply_configuration(config).await {
                Ok(_) => {}
                Err(GatewayError::ShuttingDown) => {
                    info!("Shutdown in progress, ignoring further configurations");
                    break;
                }
                Err(e) => warn!(error = %e, "Configuration rejected"),
            }
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.shared.snapshot()
    }

    pub fn active(&self) -> Option<Arc<ActivePipeline>> {
        self.shared.active()
    }

    pub fn ingress(&self) -> Ingress {
        Ingress {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Handle for status readers and the drain coordinator
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Cloneable read access to a supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
}

impl SupervisorHandle {
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.shared.snapshot()
    }

    pub fn ingress(&self) -> Ingress {
        Ingress {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// Mark the supervisor as shutting down and hand out the active pipeline
    ///
    /// Waits for an in-progress application to finish. Afterwards every
    /// `apply_configuration` fails with [`GatewayError::ShuttingDown`].
    pub(crate) async fn begin_shutdown(&self) -> Result<Option<Arc<ActivePipeline>>, GatewayError> {
        let _state = self.shared.apply.lock().await;
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return Err(GatewayError::ShuttingDown);
        }
        Ok(self.shared.active())
    }
}

/// Submits upstream requests to sources of the active pipeline by name
#[derive(Clone)]
pub struct Ingress {
    shared: Arc<Shared>,
}

impl Ingress {
    /// Submit to the named source of whichever pipeline is active now
    pub async fn submit(&self, source: &str, request: IncomingRequest) -> Result<(), IngestError> {
        let handle = {
            let active = self.shared.active.read();
            active
                .as_ref()
                .and_then(|a| a.pipeline.source(source))
                .map(|s| s.handle())
        };
        match handle {
            Some(handle) => handle.submit(request).await,
            None => Err(IngestError::UnknownSource(source.to_string())),
        }
    }
}
