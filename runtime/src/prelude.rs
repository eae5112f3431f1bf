//! Convenience re-exports for agent authors.
//!
//! ```rust
//! use cygnet_runtime::prelude::*;
//! ```

// Core types
pub use cygnet_core::{BackendAdapter, BackendError, Event, Notification};

// Pipeline configuration
pub use cygnet_gateway::{
    BackendConfig, ChannelConfig, OverflowPolicy, PipelineConfiguration, RoutingStrategy,
    SinkConfig, SourceConfig,
};

// Built-in backends
pub use cygnet_gateway::{FileBackend, MemoryBackend, StdoutBackend};

// Supervision and shutdown
pub use cygnet_gateway::{
    ComponentRegistry, DrainCoordinator, DrainPolicy, PipelineSupervisor, SupervisorHandle,
};

// Error types
pub use cygnet_gateway::{ConfigError, GatewayError};

// Payload type
pub use bytes::Bytes;

pub use std::sync::Arc;

// Runtime
pub use crate::RuntimeBuilder;
pub use crate::config::AgentConfig;
