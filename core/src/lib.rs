//! cygnet-core - Core types for the cygnet persistence agent
//!
//! This crate provides the vocabulary shared between the pipeline
//! (`cygnet-gateway`) and storage adapters implemented out of tree:
//!
//! - [`Event`] - header map plus opaque body, the unit stored in channels
//! - [`Notification`] / [`ContextElement`] - decoded change notifications
//! - [`BackendAdapter`] trait - async capability surface of a storage system
//! - [`BackendError`] - error type for adapter operations
//! - [`LifecycleState`] / [`ComponentKind`] - component state machine
//! - [`headers`] - reserved event header keys
//!
//! # Why this crate exists
//!
//! Storage adapters only need to implement [`BackendAdapter`]. Depending on
//! this crate instead of the gateway keeps adapter crates free of the
//! pipeline runtime, and lets the gateway optionally depend on them.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod backend;
mod error;
mod event;
/// Reserved event header keys
pub mod headers;
/// Component lifecycle state machine
pub mod lifecycle;
/// Decoded change notifications
pub mod notification;

pub use backend::BackendAdapter;
pub use error::{BackendError, DecodeError};
pub use event::{Event, Headers};
pub use lifecycle::{ComponentKind, Lifecycle, LifecycleState, TransitionError};
pub use notification::{ContextAttribute, ContextElement, Notification};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    // ==========================================================================
    // BackendError Tests
    // ==========================================================================

    #[test]
    fn test_backend_error_rejected_display() {
        let err = BackendError::Rejected {
            status: 500,
            reason: "Internal Server Error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rejected by backend (status 500): Internal Server Error"
        );
    }

    #[test]
    fn test_backend_error_connection_display() {
        let err = BackendError::Connection("refused".to_string());
        assert_eq!(err.to_string(), "connection error: refused");
    }

    #[test]
    fn test_backend_error_not_ready_display() {
        assert_eq!(BackendError::NotReady.to_string(), "backend not ready");
    }

    #[test]
    fn test_backend_error_transient_classification() {
        assert!(BackendError::Connection("x".into()).is_transient());
        assert!(BackendError::NotReady.is_transient());
        assert!(
            BackendError::Rejected {
                status: 503,
                reason: "busy".into()
            }
            .is_transient()
        );
        assert!(
            !BackendError::Rejected {
                status: 403,
                reason: "forbidden".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_backend_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BackendError>();
    }

    // ==========================================================================
    // BackendAdapter Trait Tests
    // ==========================================================================

    /// Adapter that tracks calls for verification
    struct TestAdapter {
        writes: AtomicU64,
        namespaces: Mutex<HashSet<String>>,
        shutdown_called: AtomicBool,
    }

    impl TestAdapter {
        fn new() -> Self {
            Self {
                writes: AtomicU64::new(0),
                namespaces: Mutex::new(HashSet::new()),
                shutdown_called: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl BackendAdapter for TestAdapter {
        fn name(&self) -> &str {
            "test"
        }

        async fn write(&self, _destination: &str, _payload: Bytes) -> Result<(), BackendError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn create_namespace_if_missing(&self, path: &str) -> Result<(), BackendError> {
            self.namespaces.lock().unwrap().insert(path.to_string());
            Ok(())
        }

        async fn exists(&self, path: &str) -> bool {
            self.namespaces.lock().unwrap().contains(path)
        }

        async fn shutdown(&self) -> Result<(), BackendError> {
            self.shutdown_called.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_adapter_is_object_safe() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(TestAdapter::new());
        assert_eq!(adapter.name(), "test");
        adapter
            .write("room1_room", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(adapter.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_adapter_namespace_then_exists() {
        let adapter = TestAdapter::new();
        assert!(!adapter.exists("smartcity/parks").await);
        adapter
            .create_namespace_if_missing("smartcity/parks")
            .await
            .unwrap();
        adapter
            .create_namespace_if_missing("smartcity/parks")
            .await
            .unwrap();
        assert!(adapter.exists("smartcity/parks").await);
    }

    #[tokio::test]
    async fn test_adapter_shutdown_override() {
        let adapter = TestAdapter::new();
        adapter.shutdown().await.unwrap();
        assert!(adapter.shutdown_called.load(Ordering::Relaxed));
        assert_eq!(adapter.writes.load(Ordering::Relaxed), 0);
    }

    /// Adapter that always fails - for testing error propagation
    struct FailingAdapter;

    #[async_trait::async_trait]
    impl BackendAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }

        async fn write(&self, _destination: &str, _payload: Bytes) -> Result<(), BackendError> {
            Err(BackendError::Connection("always fails".to_string()))
        }

        async fn create_namespace_if_missing(&self, _path: &str) -> Result<(), BackendError> {
            Err(BackendError::NotReady)
        }

        async fn exists(&self, _path: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_adapter_returns_error() {
        let result = FailingAdapter.write("t", Bytes::new()).await;
        match result {
            Err(BackendError::Connection(msg)) => assert_eq!(msg, "always fails"),
            other => panic!("expected connection error, got {other:?}"),
        }
        assert!(FailingAdapter.shutdown().await.is_ok());
    }
}
