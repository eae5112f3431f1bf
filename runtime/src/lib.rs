//! cygnet runtime - the agent process
//!
//! Provides [`run()`] for a stock agent, and [`RuntimeBuilder`] for agents
//! that register their own backends or need control over the status server.
//!
//! # Quick start
//!
//! ```ignore
//! use cygnet_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     cygnet_runtime::run(|registry| async move {
//!         Ok(registry.with_backend("archive", |_| Ok(Arc::new(MemoryBackend::new()))))
//!     }).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod prelude;
pub mod provider;

use crate::config::{AgentConfig, LogFormat};
use crate::provider::FileConfigurationProvider;
use anyhow::Context;
use cygnet_gateway::metrics::Metrics;
use cygnet_gateway::{ComponentRegistry, DrainCoordinator, PipelineSupervisor, StatusServer, TokioClock};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run the agent with settings from the environment.
///
/// Loads [`AgentConfig`], initialises tracing and metrics, lets `configure`
/// extend the backend registry, applies the configuration file and serves
/// until SIGINT or SIGTERM, then drains.
pub async fn run<F, Fut>(configure: F) -> anyhow::Result<()>
where
    F: FnOnce(ComponentRegistry) -> Fut,
    Fut: Future<Output = anyhow::Result<ComponentRegistry>>,
{
    RuntimeBuilder::new().configure(configure).await
}

/// Power-user builder for controlling runtime behaviour.
///
/// # Example
///
/// ```ignore
/// RuntimeBuilder::new()
///     .status_addr("127.0.0.1:9091".parse()?)
///     .configure(|registry| async move { Ok(registry) })
///     .await
/// ```
pub struct RuntimeBuilder {
    status_addr: Option<SocketAddr>,
    status_enabled: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            status_addr: None,
            status_enabled: true,
        }
    }

    /// Override the status server address.
    ///
    /// Default: `CYGNET_STATUS_ADDR`, or `0.0.0.0:8081`.
    pub fn status_addr(mut self, addr: SocketAddr) -> Self {
        self.status_addr = Some(addr);
        self
    }

    /// Do not serve `/status`, `/health`, `/metrics` or `/notify`.
    pub fn disable_status(mut self) -> Self {
        self.status_enabled = false;
        self
    }

    /// Load settings from the environment and run to completion.
    pub async fn configure<F, Fut>(self, configure: F) -> anyhow::Result<()>
    where
        F: FnOnce(ComponentRegistry) -> Fut,
        Fut: Future<Output = anyhow::Result<ComponentRegistry>>,
    {
        let config = AgentConfig::from_env().context("invalid agent configuration")?;
        init_tracing(&config)?;
        self.serve(config, configure).await
    }

    /// Run with explicit settings; tracing must already be initialised.
    ///
    /// Blocks until a shutdown signal arrives and the drain finishes.
    pub async fn serve<F, Fut>(self, config: AgentConfig, configure: F) -> anyhow::Result<()>
    where
        F: FnOnce(ComponentRegistry) -> Fut,
        Fut: Future<Output = anyhow::Result<ComponentRegistry>>,
    {
        let status_addr = self.status_addr.unwrap_or(config.status_addr);
        info!(
            agent = %config.agent_name,
            config_file = %config.config_file.display(),
            reload = config.reload,
            status_addr = %status_addr,
            "Starting cygnet"
        );

        // ── 1. Metrics ───────────────────────────────────────────
        Metrics::init()?;

        // ── 2. Registry + supervisor ─────────────────────────────
        let registry = configure(ComponentRegistry::with_builtin()).await?;
        let supervisor =
            PipelineSupervisor::with_retire_policy(registry, config.drain_policy(), Arc::new(TokioClock));

        // ── 3. Initial configuration (fatal on error) ────────────
        let mut provider = FileConfigurationProvider::new(&config.config_file, config.poll_interval);
        let initial = provider
            .load()
            .with_context(|| format!("cannot load {}", config.config_file.display()))?;
        supervisor
            .apply_configuration(initial)
            .await
            .context("initial configuration not applied")?;

        // ── 4. Status server ─────────────────────────────────────
        let status_handle = self
            .status_enabled
            .then(|| StatusServer::start(status_addr, supervisor.handle()));

        // ── 5. Reload loop ───────────────────────────────────────
        let reload_handle = config.reload.then(|| {
            info!(interval_secs = config.poll_interval.as_secs(), "Watching configuration file");
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.run(provider).await })
        });

        // ── 6. Wait, then drain ──────────────────────────────────
        shutdown_signal().await;

        let report = DrainCoordinator::new(supervisor.handle())
            .with_policy(config.drain_policy())
            .run()
            .await?;

        if let Some(handle) = reload_handle {
            handle.abort();
        }
        if let Some(handle) = status_handle {
            handle.abort();
        }

        if report.is_drained() {
            info!(polls = report.polls(), "cygnet shutdown complete");
        } else {
            warn!(outcome = ?report.outcome, "cygnet shutdown complete, events abandoned");
        }
        Ok(())
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global subscriber: `RUST_LOG` if set, else `CYGNET_LOG_LEVEL`
pub fn init_tracing(config: &AgentConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;
    let layer = tracing_subscriber::fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(layer.json()).try_init(),
        LogFormat::Pretty => registry.with(layer).try_init(),
    }
    .context("a tracing subscriber is already installed")
}

/// Signal that ended [`shutdown_signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Wait for SIGINT or SIGTERM
///
/// A listener that cannot be installed is logged and never fires.
pub async fn shutdown_signal() -> ShutdownSignal {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    };
    info!(signal = ?received, "Shutdown requested, draining");
    received
}
