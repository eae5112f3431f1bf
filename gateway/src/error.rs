//! Error types for the cygnet gateway

use cygnet_core::{BackendError, ComponentKind, DecodeError};
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed or inconsistent pipeline configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A component of a new configuration failed to start
    #[error(transparent)]
    ComponentStart(#[from] ComponentStartError),

    /// Routing headers do not line up with the notification
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Storage backend failure
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Upstream submission failed
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// The supervisor is draining; no more configurations are applied
    #[error("shutdown in progress")]
    ShuttingDown,
}

/// Malformed or internally inconsistent `PipelineConfiguration`
///
/// A configuration that fails with this error never becomes active.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The same name is used by two components
    #[error("duplicate component name '{name}' ({first} and {second})")]
    DuplicateName {
        name: String,
        first: ComponentKind,
        second: ComponentKind,
    },

    /// Component name is empty
    #[error("{kind} with empty name")]
    EmptyName { kind: ComponentKind },

    /// Wiring points at a component that does not exist
    #[error("{from_kind} '{from}' references unknown {to_kind} '{to}'")]
    DanglingReference {
        from_kind: ComponentKind,
        from: String,
        to_kind: ComponentKind,
        to: String,
    },

    /// Source is not wired to any channel
    #[error("source '{0}' is not wired to any channel")]
    UnwiredSource(String),

    /// No sink takes from this channel, so it could never drain
    #[error("channel '{0}' has no sink consuming it")]
    UnconsumedChannel(String),

    /// Channel capacity must be positive
    #[error("channel '{0}' must have a capacity greater than zero")]
    InvalidCapacity(String),

    /// Backend type has no registered factory
    #[error("sink '{sink}' uses unknown backend type '{backend}'")]
    UnknownBackend { sink: String, backend: String },

    /// Backend options are invalid for its type
    #[error("sink '{sink}' has invalid backend options: {reason}")]
    InvalidBackend { sink: String, reason: String },

    /// Configuration text could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Configuration file could not be read
    #[error("cannot read '{path}': {reason}")]
    Io { path: String, reason: String },
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// A named component failed to start while a configuration was applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} '{component}' failed to start: {reason}")]
pub struct ComponentStartError {
    pub component: String,
    pub kind: ComponentKind,
    pub reason: String,
}

impl ComponentStartError {
    pub fn new(component: impl Into<String>, kind: ComponentKind, reason: impl ToString) -> Self {
        Self {
            component: component.into(),
            kind,
            reason: reason.to_string(),
        }
    }
}

/// Routing headers are inconsistent with the notification they describe
///
/// The whole notification is rejected; nothing is sent for any element.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The header the strategy routes on is absent
    #[error("missing routing header '{header}'")]
    MissingHeader { header: &'static str },

    /// Positional routing keys do not match the element count
    #[error("header '{header}' has {actual} entries but the notification has {expected} elements")]
    RoutingKeyMismatch {
        header: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A delimited routing key is empty
    #[error("header '{header}' has an empty entry at position {index}")]
    EmptyRoutingKey { header: &'static str, index: usize },

    /// A context element could not be serialized
    #[error("cannot encode element {index}: {reason}")]
    Encoding { index: usize, reason: String },
}

/// Channel operation failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Channel is at capacity and configured to reject
    #[error("channel '{channel}' is full (capacity {capacity})")]
    Full { channel: String, capacity: usize },

    /// Channel was stopped
    #[error("channel '{channel}' is closed")]
    Closed { channel: String },
}

/// Upstream submission failure
///
/// Every variant means the request was not accepted and should be
/// redelivered by the upstream broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// No source with this name in the active pipeline
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    /// Source is not running
    #[error("source '{0}' is not accepting requests")]
    Stopped(String),

    /// Request body is not a valid notification
    #[error("invalid notification: {0}")]
    Decode(#[from] DecodeError),

    /// Routing headers do not line up with the notification
    #[error("invalid routing headers: {0}")]
    Protocol(#[from] ProtocolError),

    /// A wired channel refused the event
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Failure while a sink persists one event
#[derive(Error, Debug)]
pub enum SinkError {
    /// Event body is not a valid notification
    #[error("invalid notification: {0}")]
    Decode(#[from] DecodeError),

    /// Routing headers rejected the notification
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Backend failed while persisting element `index`
    #[error("backend failed on element {index} ('{destination}'): {source}")]
    Backend {
        index: usize,
        destination: String,
        #[source]
        source: BackendError,
    },
}

impl SinkError {
    /// Whether the event should go back to the channel for redelivery
    ///
    /// Only transient backend failures are redelivered. Invalid
    /// notifications and permanent backend rejections can never succeed.
    pub fn is_redeliverable(&self) -> bool {
        match self {
            SinkError::Backend { source, .. } => source.is_transient(),
            SinkError::Decode(_) | SinkError::Protocol(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_to_gateway_error() {
        let err: GatewayError = ConfigError::UnwiredSource("http".into()).into();
        assert!(matches!(err, GatewayError::Config(_)));
        assert_eq!(
            err.to_string(),
            "configuration error: source 'http' is not wired to any channel"
        );
    }

    #[test]
    fn test_component_start_error_display() {
        let err = ComponentStartError::new("hdfs-sink", ComponentKind::Sink, "connection refused");
        assert_eq!(
            err.to_string(),
            "sink 'hdfs-sink' failed to start: connection refused"
        );
        let wrapped: GatewayError = err.clone().into();
        assert_eq!(wrapped.to_string(), err.to_string());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::RoutingKeyMismatch {
            header: "destination",
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "header 'destination' has 2 entries but the notification has 3 elements"
        );
    }

    #[test]
    fn test_sink_error_redelivery_policy() {
        let backend = SinkError::Backend {
            index: 1,
            destination: "room2_room".into(),
            source: BackendError::NotReady,
        };
        assert!(backend.is_redeliverable());

        let refused = SinkError::Backend {
            index: 0,
            destination: "../escape".into(),
            source: BackendError::Rejected {
                status: 400,
                reason: "outside root".into(),
            },
        };
        assert!(!refused.is_redeliverable());

        let protocol = SinkError::Protocol(ProtocolError::MissingHeader {
            header: "destination",
        });
        assert!(!protocol.is_redeliverable());
        assert!(!SinkError::Decode(DecodeError::Empty).is_redeliverable());
    }
}
