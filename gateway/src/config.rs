//! Pipeline configuration
//!
//! A [`PipelineConfiguration`] is a full-replace snapshot of every named
//! source, channel and sink plus their wiring. There is no incremental
//! diffing: each configuration event supersedes the previous one whole.
//!
//! # JSON shape
//!
//! ```json
//! {
//!   "sources":  { "http":  { "channels": ["main"], "default_service": "smartcity" } },
//!   "channels": { "main":  { "capacity": 1000, "overflow": "block" } },
//!   "sinks":    { "files": { "channel": "main", "routing": "by-destination",
//!                            "backend": { "type": "file", "root": "/var/lib/cygnet" } } }
//! }
//! ```
//!
//! Names must be unique across all three maps. Duplicate keys inside one
//! map are a parse error rather than a silent overwrite.

use crate::backoff::BackoffConfig;
use crate::channel::OverflowPolicy;
use crate::error::ConfigError;
use crate::router::RoutingStrategy;
use crate::source::SourceSettings;
use async_trait::async_trait;
use cygnet_core::ComponentKind;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Complete description of a pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    #[serde(default, deserialize_with = "unique_keys")]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default, deserialize_with = "unique_keys")]
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(default, deserialize_with = "unique_keys")]
    pub sinks: BTreeMap<String, SinkConfig>,
}

/// A source and the channels it feeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub channels: Vec<String>,
    #[serde(flatten)]
    pub settings: SourceSettings,
}

impl SourceConfig {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            settings: SourceSettings::default(),
        }
    }

    pub fn with_default_service(mut self, service: impl Into<String>) -> Self {
        self.settings.default_service = service.into();
        self
    }

    pub fn with_default_service_path(mut self, path: impl Into<String>) -> Self {
        self.settings.default_service_path = path.into();
        self
    }
}

/// A bounded channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

fn default_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl ChannelConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// A sink, the channel it drains and its backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub channel: String,
    #[serde(default)]
    pub routing: RoutingStrategy,
    pub backend: BackendConfig,
    #[serde(default)]
    pub create_namespaces: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl SinkConfig {
    pub fn new(channel: impl Into<String>, backend: BackendConfig) -> Self {
        Self {
            channel: channel.into(),
            routing: RoutingStrategy::default(),
            backend,
            create_namespaces: false,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_routing(mut self, routing: RoutingStrategy) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_namespaces(mut self) -> Self {
        self.create_namespaces = true;
        self
    }
}

/// Redelivery backoff of a sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn to_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms)),
            ..BackoffConfig::default()
        }
    }
}

/// Backend type plus its type-specific options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl BackendConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// String option, if present and a string
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(serde_json::Value::as_bool)
    }
}

impl PipelineConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, name: impl Into<String>, source: SourceConfig) -> Self {
        self.sources.insert(name.into(), source);
        self
    }

    pub fn channel(mut self, name: impl Into<String>, channel: ChannelConfig) -> Self {
        self.channels.insert(name.into(), channel);
        self
    }

    pub fn sink(mut self, name: impl Into<String>, sink: SinkConfig) -> Self {
        self.sinks.insert(name.into(), sink);
        self
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Every component name with its kind
    pub fn components(&self) -> Vec<(&str, ComponentKind)> {
        let sources = self.sources.keys().map(|n| (n.as_str(), ComponentKind::Source));
        let channels = self.channels.keys().map(|n| (n.as_str(), ComponentKind::Channel));
        let sinks = self.sinks.keys().map(|n| (n.as_str(), ComponentKind::Sink));
        sources.chain(channels).chain(sinks).collect()
    }

    /// Check names and wiring
    ///
    /// Names must be non-empty and unique across kinds. Every source feeds
    /// at least one existing channel, every sink drains an existing
    /// channel, and every channel is drained by at least one sink, since an
    /// undrained channel would stall shutdown forever.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<&str, ComponentKind> = HashMap::new();
        for (name, kind) in self.components() {
            if name.is_empty() {
                return Err(ConfigError::EmptyName { kind });
            }
            if let Some(first) = seen.insert(name, kind) {
                return Err(ConfigError::DuplicateName {
                    name: name.to_string(),
                    first,
                    second: kind,
                });
            }
        }

        for (name, channel) in &self.channels {
            if channel.capacity == 0 {
                return Err(ConfigError::InvalidCapacity(name.clone()));
            }
        }

        for (name, source) in &self.sources {
            if source.channels.is_empty() {
                return Err(ConfigError::UnwiredSource(name.clone()));
            }
            for channel in &source.channels {
                if !self.channels.contains_key(channel) {
                    return Err(ConfigError::DanglingReference {
                        from_kind: ComponentKind::Source,
                        from: name.clone(),
                        to_kind: ComponentKind::Channel,
                        to: channel.clone(),
                    });
                }
            }
        }

        for (name, sink) in &self.sinks {
            if !self.channels.contains_key(&sink.channel) {
                return Err(ConfigError::DanglingReference {
                    from_kind: ComponentKind::Sink,
                    from: name.clone(),
                    to_kind: ComponentKind::Channel,
                    to: sink.channel.clone(),
                });
            }
        }

        for name in self.channels.keys() {
            if !self.sinks.values().any(|s| &s.channel == name) {
                return Err(ConfigError::UnconsumedChannel(name.clone()));
            }
        }

        Ok(())
    }
}

fn unique_keys<'de, D, V>(deserializer: D) -> Result<BTreeMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct UniqueKeys<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for UniqueKeys<V> {
        type Value = BTreeMap<String, V>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of component names")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut map = BTreeMap::new();
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                if map.contains_key(&key) {
                    return Err(de::Error::custom(format_args!(
                        "duplicate component name '{key}'"
                    )));
                }
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(UniqueKeys(PhantomData))
}

/// Producer of full-replace configuration events
#[async_trait]
pub trait ConfigurationProvider: Send {
    /// Wait for the next configuration; `None` once no more will arrive
    async fn next_configuration(&mut self) -> Option<PipelineConfiguration>;
}

#[async_trait]
impl ConfigurationProvider for mpsc::Receiver<PipelineConfiguration> {
    async fn next_configuration(&mut self) -> Option<PipelineConfiguration> {
        self.recv().await
    }
}
