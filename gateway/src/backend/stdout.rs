//! Stdout backend for debugging
//!
//! Prints each record with its destination.

use async_trait::async_trait;
use bytes::Bytes;
use cygnet_core::{BackendAdapter, BackendError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Prints records to stdout
pub struct StdoutBackend {
    /// Print the payload itself, not just its size
    verbose: bool,
    written: AtomicU64,
}

impl StdoutBackend {
    pub fn new() -> Self {
        Self {
            verbose: false,
            written: AtomicU64::new(0),
        }
    }

    /// Print payloads in full
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            written: AtomicU64::new(0),
        }
    }

    pub fn written_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl Default for StdoutBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for StdoutBackend {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn write(&self, destination: &str, payload: Bytes) -> Result<(), BackendError> {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();
        if self.verbose {
            writeln!(
                stdout,
                "[{destination}] {}",
                String::from_utf8_lossy(&payload)
            )?;
        } else {
            writeln!(stdout, "[{destination}] ({} bytes)", payload.len())?;
        }
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn create_namespace_if_missing(&self, _path: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn exists(&self, _path: &str) -> bool {
        true
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        use std::io::Write;
        std::io::stdout().flush()?;
        Ok(())
    }
}
