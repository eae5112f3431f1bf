//! Agent with an extra backend type and a fixed status port.
//!
//! ```bash
//! CYGNET_AGENT_NAME=demo CYGNET_CONFIG_FILE=pipeline.json \
//!     cargo run -p cygnet-runtime --example custom_backend
//! ```
//!
//! Sinks in `pipeline.json` can then use `"backend": {"type": "counting"}`.

use async_trait::async_trait;
use cygnet_runtime::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts writes per process and logs every tenth
#[derive(Default)]
struct CountingBackend {
    writes: AtomicU64,
}

#[async_trait]
impl BackendAdapter for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    async fn write(&self, destination: &str, _payload: Bytes) -> Result<(), BackendError> {
        let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 10 == 0 {
            tracing::info!(destination, writes = n, "Counting backend progress");
        }
        Ok(())
    }

    async fn create_namespace_if_missing(&self, _path: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn exists(&self, _path: &str) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    RuntimeBuilder::new()
        .status_addr("127.0.0.1:9091".parse()?)
        .configure(|registry| async move {
            Ok(registry.with_backend("counting", |_| Ok(Arc::new(CountingBackend::default()))))
        })
        .await
}
