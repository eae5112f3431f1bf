//! Local filesystem backend
//!
//! Lays records out the way the distributed-filesystem adapter does, under
//! a local root directory:
//!
//! ```text
//! {root}/{destination}/{last segment of destination}.txt
//! ```
//!
//! Each write appends the payload as one line.

use async_trait::async_trait;
use bytes::Bytes;
use cygnet_core::{BackendAdapter, BackendError};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Appends records to text files under a root directory
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a logical path, refusing anything that escapes the root
    fn resolve(&self, path: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        let mut segments = 0;
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    resolved.push(segment);
                    segments += 1;
                }
                Component::CurDir => {}
                _ => {
                    return Err(BackendError::Rejected {
                        status: 400,
                        reason: format!("path '{path}' leaves the backend root"),
                    });
                }
            }
        }
        if segments == 0 {
            return Err(BackendError::Rejected {
                status: 400,
                reason: format!("path '{path}' is empty"),
            });
        }
        Ok(resolved)
    }

    /// File a destination's records are appended to
    pub fn file_for(&self, destination: &str) -> Result<PathBuf, BackendError> {
        let dir = self.resolve(destination)?;
        let stem = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(dir.join(format!("{stem}.txt")))
    }
}

#[async_trait]
impl BackendAdapter for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn start(&self) -> Result<(), BackendError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn write(&self, destination: &str, payload: Bytes) -> Result<(), BackendError> {
        let path = self.file_for(destination)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(&payload);
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(path = %path.display(), size = payload.len(), "appended record");
        Ok(())
    }

    async fn create_namespace_if_missing(&self, path: &str) -> Result<(), BackendError> {
        let dir = self.resolve(path)?;
        // create_dir_all succeeds when the directory already exists
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => tokio::fs::metadata(&resolved).await.is_ok(),
            Err(_) => false,
        }
    }
}
