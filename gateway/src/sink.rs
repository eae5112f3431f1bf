//! Sink - persists events from one channel through one backend
//!
//! Each sink runs a worker task:
//!
//! 1. take an event from its channel
//! 2. decode the notification and route it ([`EventRouter`])
//! 3. optionally create each target namespace, once per target
//! 4. dispatch every route to the backend, in element order
//! 5. commit the event
//!
//! An invalid notification (decode or routing error) can never succeed,
//! so it is logged, counted and committed out of the channel. So is an
//! event the backend refuses permanently. A transient backend failure
//! rolls the event back for redelivery after a backoff.

use crate::backoff::BackoffConfig;
use crate::channel::{Channel, Delivery};
use crate::error::{ComponentStartError, SinkError};
use crate::metrics::Metrics;
use crate::router::{EventRouter, RoutingStrategy, dispatch};
use cygnet_core::{
    BackendAdapter, BackendError, ComponentKind, Event, Lifecycle, LifecycleState, Notification,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a sink routes and retries
#[derive(Debug, Clone, Default)]
pub struct SinkSettings {
    pub strategy: RoutingStrategy,
    /// Call `create_namespace_if_missing` before the first write to a target
    pub create_namespaces: bool,
    /// Delay before redelivering after a backend failure
    pub retry: BackoffConfig,
}

/// Consumer of one channel
pub struct Sink {
    name: Arc<str>,
    channel: Arc<Channel>,
    backend: Arc<dyn BackendAdapter>,
    settings: SinkSettings,
    lifecycle: Lifecycle,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sink {
    pub fn new(
        name: impl Into<String>,
        channel: Arc<Channel>,
        backend: Arc<dyn BackendAdapter>,
        settings: SinkSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name: Arc::from(name.into()),
            channel,
            backend,
            settings,
            lifecycle: Lifecycle::new(),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        ComponentKind::Sink
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn backend(&self) -> &Arc<dyn BackendAdapter> {
        &self.backend
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }

    /// Start the backend, then spawn the worker
    pub async fn start(&self) -> Result<(), ComponentStartError> {
        let fail = |reason: String| ComponentStartError::new(self.name.as_ref(), ComponentKind::Sink, reason);

        self.lifecycle
            .transition(LifecycleState::Starting)
            .map_err(|e| fail(e.to_string()))?;

        if let Err(e) = self.backend.start().await {
            let _ = self.lifecycle.transition(LifecycleState::Failed);
            error!(sink = %self.name, backend = self.backend.name(), error = %e, "Backend failed to start");
            return Err(fail(e.to_string()));
        }

        let worker = Worker {
            name: Arc::clone(&self.name),
            channel: Arc::clone(&self.channel),
            backend: Arc::clone(&self.backend),
            router: EventRouter::new(self.settings.strategy),
            create_namespaces: self.settings.create_namespaces,
            retry: self.settings.retry.clone(),
            known_namespaces: NamespaceCache::new(NamespaceCache::DEFAULT_LIMIT),
        };
        *self.task.lock() = Some(tokio::spawn(worker.run(self.shutdown.subscribe())));

        self.lifecycle
            .transition(LifecycleState::Running)
            .map_err(|e| fail(e.to_string()))?;
        info!(
            sink = %self.name,
            channel = %self.channel.name(),
            backend = self.backend.name(),
            strategy = %self.settings.strategy,
            "Sink started"
        );
        Ok(())
    }

    /// Stop the worker, then shut the backend down
    ///
    /// An event being persisted when this is called is finished first.
    pub async fn stop(&self) -> Result<(), BackendError> {
        if self.state().is_terminal() {
            return Ok(());
        }
        if self.lifecycle.transition(LifecycleState::Stopped).is_ok() {
            info!(sink = %self.name, "Sink discarded before start");
            return Ok(());
        }
        if self.lifecycle.transition(LifecycleState::Stopping).is_err() {
            return Ok(());
        }

        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(sink = %self.name, error = %e, "Sink worker failed");
        }

        match self.backend.shutdown().await {
            Ok(()) => {
                let _ = self.lifecycle.transition(LifecycleState::Stopped);
                info!(sink = %self.name, state = %self.state(), "Sink stopped");
                Ok(())
            }
            Err(e) => {
                let _ = self.lifecycle.transition(LifecycleState::Failed);
                error!(sink = %self.name, error = %e, "Backend shutdown failed");
                Err(e)
            }
        }
    }
}

struct Worker {
    name: Arc<str>,
    channel: Arc<Channel>,
    backend: Arc<dyn BackendAdapter>,
    router: EventRouter,
    create_namespaces: bool,
    retry: BackoffConfig,
    known_namespaces: NamespaceCache,
}

/// Targets whose namespace already exists
///
/// Cleared once it holds `limit` targets; creating a namespace again is
/// idempotent, so forgetting only costs an extra backend call.
struct NamespaceCache {
    known: HashSet<String>,
    limit: usize,
}

impl NamespaceCache {
    const DEFAULT_LIMIT: usize = 10_000;

    fn new(limit: usize) -> Self {
        Self {
            known: HashSet::new(),
            limit: limit.max(1),
        }
    }

    fn contains(&self, target: &str) -> bool {
        self.known.contains(target)
    }

    fn insert(&mut self, target: &str) {
        if self.known.len() >= self.limit {
            debug!(entries = self.known.len(), "Namespace cache full, clearing");
            self.known.clear();
        }
        self.known.insert(target.to_string());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.known.len()
    }
}

impl Worker {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut failures = 0u32;

        loop {
            let delivery = tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                delivery = self.channel.take() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            if self.handle(delivery).await {
                failures = 0;
                continue;
            }

            failures = failures.saturating_add(1);
            let delay = self.retry.delay_for_attempt(failures);
            debug!(sink = %self.name, attempt = failures, delay_ms = delay.as_millis() as u64, "Redelivery backoff");
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(sink = %self.name, "Sink worker exited");
    }

    /// Persist one delivery; false if it went back to the channel
    async fn handle(&mut self, delivery: Delivery) -> bool {
        let started = Instant::now();
        match self.persist(delivery.event()).await {
            Ok(written) => {
                delivery.commit();
                debug!(sink = %self.name, records = written, "Notification persisted");
                if let Some(metrics) = Metrics::get() {
                    metrics.record_persist_duration(&self.name, started.elapsed());
                }
                true
            }
            Err(e) if e.is_redeliverable() => {
                warn!(sink = %self.name, error = %e, "Persisting failed, event returned to channel");
                delivery.rollback();
                false
            }
            Err(e) => {
                error!(sink = %self.name, error = %e, "Notification rejected, committed out of channel");
                if let Some(metrics) = Metrics::get() {
                    metrics.record_notification_rejected(&self.name);
                }
                delivery.commit();
                true
            }
        }
    }

    async fn persist(&mut self, event: &Event) -> Result<usize, SinkError> {
        let notification = Notification::decode(&event.body)?;
        let routes = self.router.route(&event.headers, &notification)?;

        if self.create_namespaces {
            for route in &routes {
                if self.known_namespaces.contains(&route.target) {
                    continue;
                }
                if let Err(source) = self.backend.create_namespace_if_missing(&route.target).await {
                    if let Some(metrics) = Metrics::get() {
                        metrics.record_backend_failure(&self.name);
                    }
                    return Err(SinkError::Backend {
                        index: route.index,
                        destination: route.target.clone(),
                        source,
                    });
                }
                self.known_namespaces.insert(&route.target);
            }
        }

        dispatch(&routes, self.backend.as_ref(), &self.name).await
    }
}
