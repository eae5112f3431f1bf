//! cygnet - context-change persistence pipelines
//!
//! Receives change notifications from an upstream broker and persists every
//! context element to one or more storage backends.
//!
//! # Architecture
//!
//! ```text
//! Sources ──► Channels ──► Sinks ──► EventRouter ──► BackendAdapter
//! ```
//!
//! A [`PipelineSupervisor`] builds the components of a
//! [`PipelineConfiguration`], starts them downstream-first and replaces them
//! whole on reconfiguration. A [`DrainCoordinator`] stops the active pipeline
//! without losing events that were already accepted.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod backend;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod drain;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod sink;
pub mod source;
pub mod status_server;
pub mod supervisor;

pub use backend::{FileBackend, MemoryBackend, StdoutBackend};
pub use backoff::BackoffConfig;
pub use channel::{Channel, Delivery, OverflowPolicy};
pub use config::{
    BackendConfig, ChannelConfig, ConfigurationProvider, PipelineConfiguration, RetryConfig,
    SinkConfig, SourceConfig,
};
pub use cygnet_core::{BackendAdapter, BackendError, ComponentKind, Event, LifecycleState, Notification};
pub use drain::{Clock, DrainCoordinator, DrainOutcome, DrainPolicy, DrainReport, TokioClock};
pub use error::{
    ChannelError, ComponentStartError, ConfigError, GatewayError, IngestError, ProtocolError,
    Result, SinkError,
};
pub use pipeline::{ComponentStatus, Pipeline};
pub use registry::ComponentRegistry;
pub use router::{EventRouter, Route, RoutingStrategy};
pub use sink::{Sink, SinkSettings};
pub use source::{IncomingRequest, RequestSource, SourceHandle, SourceSettings};
pub use status_server::StatusServer;
pub use supervisor::{ActivePipeline, Ingress, PipelineSnapshot, PipelineSupervisor, SupervisorHandle};
