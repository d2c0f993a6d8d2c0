// GA Realtime Exporter - Configuration loading
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Exporter configuration file.
//!
//! ```yaml
//! interval: 10
//! viewid: "ga:12345678"
//! port: "9674"
//! metrics:
//!   - name: rt:activeUsers
//!   - name: rt:pageviews
//!     dimensions: ["rt:medium"]
//!     sort: ["-rt:pageviews"]
//!     limit: "10"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ga_realtime::{
    gauge_name, MetricDefinition, PollerConfig, DEFAULT_QUERY_TIMEOUT, SELF_METRIC_PREFIX,
};
use serde::{Deserialize, Deserializer};

/// Default configuration path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./config/conf.yaml";

/// Port used when the configuration does not name one.
pub const DEFAULT_PORT: u16 = 9100;

/// Exporter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Seconds between polling cycles.
    pub interval: u64,

    /// Analytics view queried by every metric (`ga:<id>`).
    pub viewid: String,

    /// HTTP port for the exposition endpoint.
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,

    /// Metrics to poll.
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,

    /// Per-query timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ExporterConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::Invalid("interval must be greater than zero".into()));
        }
        if self.viewid.trim().is_empty() {
            return Err(ConfigError::Invalid("viewid must not be empty".into()));
        }
        if self.timeout == Some(0) {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        if self.metrics.is_empty() {
            return Err(ConfigError::Invalid("no metrics configured".into()));
        }
        if let Some(pos) = self.metrics.iter().position(|m| m.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "metric #{} has an empty name",
                pos + 1
            )));
        }
        for metric in &self.metrics {
            let name = gauge_name(&metric.identifier());
            if name.starts_with(SELF_METRIC_PREFIX) {
                return Err(ConfigError::Invalid(format!(
                    "metric {} maps to gauge {name}, which uses the reserved prefix {SELF_METRIC_PREFIX}",
                    metric.name
                )));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn query_timeout(&self) -> Duration {
        self.timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_QUERY_TIMEOUT)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::new(self.interval()).with_query_timeout(self.query_timeout())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u64),
    Text(String),
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let port = match RawPort::deserialize(deserializer)? {
        RawPort::Number(n) => u16::try_from(n).ok(),
        RawPort::Text(s) => s.trim().parse::<u16>().ok(),
    };
    port.ok_or_else(|| serde::de::Error::custom("port must be an integer between 0 and 65535"))
}

/// Configuration errors. All of them stop the exporter before it serves.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
