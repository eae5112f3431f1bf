//! Configuration file watcher
//!
//! Polls the file's modification time and emits the whole configuration
//! again whenever it changes.

use async_trait::async_trait;
use cygnet_gateway::{ConfigError, ConfigurationProvider, PipelineConfiguration};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// [`ConfigurationProvider`] backed by a JSON file on disk
pub struct FileConfigurationProvider {
    path: PathBuf,
    interval: Duration,
    last_modified: Option<SystemTime>,
}

impl FileConfigurationProvider {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file now
    ///
    /// The modification time seen here becomes the baseline for polling, so
    /// the configuration just loaded is not emitted a second time.
    pub fn load(&mut self) -> Result<PipelineConfiguration, ConfigError> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        let config = PipelineConfiguration::from_path(&self.path)?;
        self.last_modified = modified;
        Ok(config)
    }

    async fn modified(&self) -> Option<SystemTime> {
        match tokio::fs::metadata(&self.path).await.and_then(|m| m.modified()) {
            Ok(modified) => Some(modified),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot stat configuration file");
                None
            }
        }
    }
}

#[async_trait]
impl ConfigurationProvider for FileConfigurationProvider {
    /// Waits until the file changes and parses; never returns `None`
    async fn next_configuration(&mut self) -> Option<PipelineConfiguration> {
        loop {
            tokio::time::sleep(self.interval).await;

            let Some(modified) = self.modified().await else {
                continue;
            };
            if self.last_modified == Some(modified) {
                continue;
            }
            self.last_modified = Some(modified);

            let text = match tokio::fs::read_to_string(&self.path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Cannot read configuration file");
                    continue;
                }
            };
            match PipelineConfiguration::from_json(&text) {
                Ok(config) => {
                    info!(path = %self.path.display(), "Configuration file changed");
                    return Some(config);
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Ignoring invalid configuration");
                }
            }
        }
    }
}
