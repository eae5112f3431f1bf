//! A materialized pipeline: the named sources, channels and sinks of one
//! configuration.

use crate::channel::Channel;
use crate::error::ComponentStartError;
use crate::sink::Sink;
use crate::source::RequestSource;
use cygnet_core::{ComponentKind, LifecycleState};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Read-only status of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub kind: ComponentKind,
    pub state: LifecycleState,
}

/// Component sets built from one configuration
///
/// Each set is ordered by name.
pub struct Pipeline {
    sources: Vec<RequestSource>,
    channels: Vec<Arc<Channel>>,
    sinks: Vec<Sink>,
}

impl Pipeline {
    pub fn new(sources: Vec<RequestSource>, channels: Vec<Arc<Channel>>, sinks: Vec<Sink>) -> Self {
        Self {
            sources,
            channels,
            sinks,
        }
    }

    pub fn sources(&self) -> &[RequestSource] {
        &self.sources
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn sinks(&self) -> &[Sink] {
        &self.sinks
    }

    pub fn source(&self, name: &str) -> Option<&RequestSource> {
        self.sources.iter().find(|s| s.name() == name)
    }

    pub fn channel(&self, name: &str) -> Option<&Arc<Channel>> {
        self.channels.iter().find(|c| c.name() == name)
    }

    pub fn sink(&self, name: &str) -> Option<&Sink> {
        self.sinks.iter().find(|s| s.name() == name)
    }

    /// Start sinks, then channels, then sources
    ///
    /// Downstream is ready before anything upstream can emit. On the first
    /// failure every component is stopped again and the error returned.
    pub async fn start(&self) -> Result<(), ComponentStartError> {
        if let Err(e) = self.start_in_order().await {
            warn!(component = %e.component, kind = %e.kind, "Start failed, stopping started components");
            self.abort().await;
            return Err(e);
        }
        info!(
            sources = self.sources.len(),
            channels = self.channels.len(),
            sinks = self.sinks.len(),
            "Pipeline started"
        );
        Ok(())
    }

    async fn start_in_order(&self) -> Result<(), ComponentStartError> {
        for sink in &self.sinks {
            sink.start().await?;
        }
        for channel in &self.channels {
            channel.start()?;
        }
        for source in &self.sources {
            source.start()?;
        }
        Ok(())
    }

    /// Stop everything without waiting for channels to drain
    async fn abort(&self) {
        self.stop_sources().await;
        self.stop_channels();
        self.stop_sinks().await;
    }

    /// Stop every source; returns how many stops failed
    ///
    /// Each stop is independent: a failure is logged and the rest proceed.
    pub async fn stop_sources(&self) -> usize {
        let mut failed = 0;
        for source in &self.sources {
            if let Err(e) = source.stop().await {
                warn!(source = %source.name(), error = %e, "Failed to stop source");
                failed += 1;
            }
        }
        failed
    }

    /// Close every channel
    pub fn stop_channels(&self) {
        for channel in &self.channels {
            channel.stop();
        }
    }

    /// Stop every sink; returns how many stops failed
    pub async fn stop_sinks(&self) -> usize {
        let mut failed = 0;
        for sink in &self.sinks {
            if let Err(e) = sink.stop().await {
                warn!(sink = %sink.name(), error = %e, "Failed to stop sink");
                failed += 1;
            }
        }
        failed
    }

    /// Pending count of every channel, observed in one pass
    pub fn pending(&self) -> Vec<(String, usize)> {
        self.channels
            .iter()
            .map(|c| (c.name().to_string(), c.pending()))
            .collect()
    }

    /// Status of every component: sources, channels, sinks
    pub fn statuses(&self) -> Vec<ComponentStatus> {
        let sources = self.sources.iter().map(|s| ComponentStatus {
            name: s.name().to_string(),
            kind: ComponentKind::Source,
            state: s.state(),
        });
        let channels = self.channels.iter().map(|c| ComponentStatus {
            name: c.name().to_string(),
            kind: ComponentKind::Channel,
            state: c.state(),
        });
        let sinks = self.sinks.iter().map(|s| ComponentStatus {
            name: s.name().to_string(),
            kind: ComponentKind::Sink,
            state: s.state(),
        });
        sources.chain(channels).chain(sinks).collect()
    }
}
