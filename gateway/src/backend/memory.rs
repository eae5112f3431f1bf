//! In-memory backend
//!
//! Keeps every write for inspection. Used by tests and dry runs.

use async_trait::async_trait;
use bytes::Bytes;
use cygnet_core::{BackendAdapter, BackendError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A write observed by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub destination: String,
    pub payload: Bytes,
}

/// Backend that stores records in memory
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<Vec<StoredRecord>>,
    namespaces: Mutex<BTreeSet<String>>,
    failures_left: AtomicUsize,
    shut_down: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes with a connection error
    pub fn fail_next_writes(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every successful write, in order
    pub fn records(&self) -> Vec<StoredRecord> {
        self.records.lock().clone()
    }

    /// Destinations of every successful write, in order
    pub fn destinations(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|r| r.destination.clone())
            .collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().iter().cloned().collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendAdapter for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, destination: &str, payload: Bytes) -> Result<(), BackendError> {
        // NotReady keeps the event in its channel
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BackendError::NotReady);
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BackendError::Connection("injected failure".into()));
        }
        self.records.lock().push(StoredRecord {
            destination: destination.to_string(),
            payload,
        });
        Ok(())
    }

    async fn create_namespace_if_missing(&self, path: &str) -> Result<(), BackendError> {
        self.namespaces.lock().insert(path.to_string());
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        self.namespaces.lock().contains(path)
            || self.records.lock().iter().any(|r| r.destination == path)
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_in_order() {
        let backend = MemoryBackend::new();
        backend.write("a", Bytes::from_static(b"1")).await.unwrap();
        backend.write("b", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(backend.destinations(), vec!["a", "b"]);
        assert!(backend.exists("a").await);
        assert!(!backend.exists("c").await);
    }

    #[tokio::test]
    async fn test_injected_failures_then_recovery() {
        let backend = MemoryBackend::new();
        backend.fail_next_writes(2);
        assert!(backend.write("a", Bytes::new()).await.is_err());
        assert!(backend.write("a", Bytes::new()).await.is_err());
        assert!(backend.write("a", Bytes::new()).await.is_ok());
        assert_eq!(backend.records().len(), 1);
    }

    #[tokio::test]
    async fn test_namespace_idempotent() {
        let backend = MemoryBackend::new();
        backend.create_namespace_if_missing("p").await.unwrap();
        backend.create_namespace_if_missing("p").await.unwrap();
        assert_eq!(backend.namespaces(), vec!["p"]);
    }

    #[tokio::test]
    async fn test_writes_fail_after_shutdown() {
        let backend = MemoryBackend::new();
        backend.shutdown().await.unwrap();
        assert!(backend.is_shut_down());
        let err = backend.write("a", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::NotReady));
        assert!(backend.records().is_empty());
    }
}
