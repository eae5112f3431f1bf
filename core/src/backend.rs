//! Backend adapter capability trait
//!
//! A [`BackendAdapter`] performs single operations against one storage
//! system: a distributed filesystem, a warehouse table service, a broker
//! topic. Sinks call adapters synchronously on their own task, so a slow
//! adapter slows only its own sink.

use crate::error::BackendError;
use async_trait::async_trait;
use bytes::Bytes;

/// Storage capability consumed by sinks
///
/// # Implementation Requirements
///
/// - Adapters must be `Send + Sync`; one instance is shared by a sink's task
/// - `create_namespace_if_missing` must be idempotent: calling it twice for
///   the same path succeeds both times
/// - `write` must not be retried internally; the sink owns retry policy
///
/// # Example
///
/// ```ignore
/// use cygnet_core::{BackendAdapter, BackendError};
/// use async_trait::async_trait;
/// use bytes::Bytes;
///
/// struct TopicAdapter {
///     producer: MyProducer,
/// }
///
/// #[async_trait]
/// impl BackendAdapter for TopicAdapter {
///     fn name(&self) -> &str {
///         "topics"
///     }
///
///     async fn write(&self, destination: &str, payload: Bytes) -> Result<(), BackendError> {
///         self.producer
///             .send(destination, payload)
///             .await
///             .map_err(|e| BackendError::Connection(e.to_string()))
///     }
///
///     async fn create_namespace_if_missing(&self, _path: &str) -> Result<(), BackendError> {
///         Ok(()) // topics are auto-created
///     }
///
///     async fn exists(&self, path: &str) -> bool {
///         self.producer.has_topic(path).await
///     }
/// }
/// ```
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short name for logs and metrics (e.g. "hdfs", "topics", "memory")
    fn name(&self) -> &str;

    /// Persist one payload at `destination`
    async fn write(&self, destination: &str, payload: Bytes) -> Result<(), BackendError>;

    /// Ensure the namespace (directory, database, topic) at `path` exists
    async fn create_namespace_if_missing(&self, path: &str) -> Result<(), BackendError>;

    /// Whether `path` exists in the store
    ///
    /// Lookup failures report `false`, the same answer as a missing path.
    async fn exists(&self, path: &str) -> bool;

    /// Open sessions or verify reachability before the owning sink runs
    ///
    /// A failure here fails the sink's start. Default: nothing to do.
    async fn start(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Flush and release resources after the owning sink stopped
    async fn shutdown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
