//! Component registry
//!
//! Maps backend type names to factories and turns a validated
//! [`PipelineConfiguration`] into an idle [`Pipeline`].

use crate::backend::{FileBackend, MemoryBackend, StdoutBackend};
use crate::channel::Channel;
use crate::config::{BackendConfig, PipelineConfiguration};
use crate::error::ConfigError;
use crate::pipeline::Pipeline;
use crate::sink::{Sink, SinkSettings};
use crate::source::RequestSource;
use cygnet_core::BackendAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds a backend from its options; errors are a human-readable reason
pub type BackendFactory =
    Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn BackendAdapter>, String> + Send + Sync>;

/// Registry of backend factories
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    backends: HashMap<String, BackendFactory>,
}

impl ComponentRegistry {
    /// Registry with no backends
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `memory`, `file` and `stdout`
    ///
    /// `file` requires a `root` option; `stdout` accepts `verbose`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_backend("memory", |_| Ok(Arc::new(MemoryBackend::new())));
        registry.register_backend("file", |config| {
            let root = config
                .option_str("root")
                .ok_or_else(|| "missing string option 'root'".to_string())?;
            Ok(Arc::new(FileBackend::new(root)))
        });
        registry.register_backend("stdout", |config| {
            if config.option_bool("verbose").unwrap_or(false) {
                Ok(Arc::new(StdoutBackend::verbose()))
            } else {
                Ok(Arc::new(StdoutBackend::new()))
            }
        });
        registry
    }

    /// Register (or replace) the factory for a backend type
    ///
    /// The factory runs once per sink and must return a new adapter each
    /// time. Stopping a sink shuts its adapter down, and a reconfiguration
    /// stops the old sinks after the new ones have started.
    pub fn register_backend<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn BackendAdapter>, String> + Send + Sync + 'static,
    {
        let kind = kind.into();
        debug!(backend = %kind, "Registered backend factory");
        self.backends.insert(kind, Arc::new(factory));
    }

    /// Builder form of [`register_backend`](Self::register_backend)
    pub fn with_backend<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn BackendAdapter>, String> + Send + Sync + 'static,
    {
        self.register_backend(kind, factory);
        self
    }

    pub fn has_backend(&self, kind: &str) -> bool {
        self.backends.contains_key(kind)
    }

    /// Registered backend types, sorted
    pub fn backend_types(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Validate `config` and build its components, all idle
    pub fn materialize(&self, config: &PipelineConfiguration) -> Result<Pipeline, ConfigError> {
        config.validate()?;

        let mut backends = Vec::with_capacity(config.sinks.len());
        for (name, sink) in &config.sinks {
            let factory = self
                .backends
                .get(&sink.backend.kind)
                .ok_or_else(|| ConfigError::UnknownBackend {
                    sink: name.clone(),
                    backend: sink.backend.kind.clone(),
                })?;
            let backend = factory(&sink.backend).map_err(|reason| ConfigError::InvalidBackend {
                sink: name.clone(),
                reason,
            })?;
            backends.push(backend);
        }

        let channels: HashMap<&str, Arc<Channel>> = config
            .channels
            .iter()
            .map(|(name, c)| {
                (
                    name.as_str(),
                    Arc::new(Channel::new(name.clone(), c.capacity, c.overflow)),
                )
            })
            .collect();
        // validate() guarantees every referenced channel exists
        let wired = |name: &str| -> Result<Arc<Channel>, ConfigError> {
            channels
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::Parse(format!("unresolved channel '{name}'")))
        };

        let sources = config
            .sources
            .iter()
            .map(|(name, source)| {
                let wiring = source
                    .channels
                    .iter()
                    .map(|c| wired(c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RequestSource::new(name.clone(), source.settings.clone(), wiring))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let sinks = config
            .sinks
            .iter()
            .zip(backends)
            .map(|((name, sink), backend)| {
                let settings = SinkSettings {
                    strategy: sink.routing,
                    create_namespaces: sink.create_namespaces,
                    retry: sink.retry.to_backoff(),
                };
                Ok(Sink::new(name.clone(), wired(&sink.channel)?, backend, settings))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let ordered: Vec<Arc<Channel>> = config
            .channels
            .keys()
            .filter_map(|name| channels.get(name.as_str()).cloned())
            .collect();

        info!(
            sources = sources.len(),
            channels = ordered.len(),
            sinks = sinks.len(),
            "Pipeline materialized"
        );
        Ok(Pipeline::new(sources, ordered, sinks))
    }
}
