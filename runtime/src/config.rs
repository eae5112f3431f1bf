//! Process configuration from `CYGNET_*` environment variables

use anyhow::{Context, bail};
use cygnet_gateway::DrainPolicy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => bail!("unknown log format '{other}' (expected json or pretty)"),
        }
    }
}

/// Agent settings
///
/// | Variable | Default |
/// |----------|---------|
/// | `CYGNET_AGENT_NAME` | required |
/// | `CYGNET_CONFIG_FILE` | required, must exist |
/// | `CYGNET_RELOAD` | `true` |
/// | `CYGNET_CONFIG_POLL_SECS` | `30` |
/// | `CYGNET_STATUS_ADDR` | `0.0.0.0:8081` |
/// | `CYGNET_DRAIN_INTERVAL_SECS` | `5` |
/// | `CYGNET_DRAIN_MAX_WAIT_SECS` | unbounded |
/// | `CYGNET_LOG_LEVEL` | `info` |
/// | `CYGNET_LOG_FORMAT` | `pretty` |
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub agent_name: String,
    pub config_file: PathBuf,
    pub reload: bool,
    pub poll_interval: Duration,
    pub status_addr: SocketAddr,
    pub drain_interval: Duration,
    pub drain_max_wait: Option<Duration>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| -> anyhow::Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{key} is not set"))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: &str| -> anyhow::Result<Duration> {
            let raw = or_default(key, default);
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("{key}: '{raw}' is not a number of seconds"))?;
            if secs == 0 {
                bail!("{key} must be greater than zero");
            }
            Ok(Duration::from_secs(secs))
        };

        let agent_name = required("CYGNET_AGENT_NAME")?;
        let config_file = PathBuf::from(required("CYGNET_CONFIG_FILE")?);
        if !config_file.is_file() {
            bail!(
                "CYGNET_CONFIG_FILE: '{}' does not exist or is not a file",
                config_file.display()
            );
        }

        let reload = match or_default("CYGNET_RELOAD", "true").to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => bail!("CYGNET_RELOAD: '{other}' is not a boolean"),
        };

        let status_raw = or_default("CYGNET_STATUS_ADDR", "0.0.0.0:8081");
        let status_addr: SocketAddr = status_raw
            .parse()
            .with_context(|| format!("CYGNET_STATUS_ADDR: '{status_raw}' is not a socket address"))?;

        let drain_max_wait = match lookup("CYGNET_DRAIN_MAX_WAIT_SECS") {
            Some(_) => Some(secs("CYGNET_DRAIN_MAX_WAIT_SECS", "0")?),
            None => None,
        };

        Ok(Self {
            agent_name,
            config_file,
            reload,
            poll_interval: secs("CYGNET_CONFIG_POLL_SECS", "30")?,
            status_addr,
            drain_interval: secs("CYGNET_DRAIN_INTERVAL_SECS", "5")?,
            drain_max_wait,
            log_level: or_default("CYGNET_LOG_LEVEL", "info"),
            log_format: or_default("CYGNET_LOG_FORMAT", "pretty").parse()?,
        })
    }

    /// Drain schedule used both at shutdown and when retiring pipelines
    pub fn drain_policy(&self) -> DrainPolicy {
        let policy = DrainPolicy::fixed(self.drain_interval);
        match self.drain_max_wait {
            Some(max_wait) => policy.with_max_wait(max_wait),
            None => policy,
        }
    }
}
