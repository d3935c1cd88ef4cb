//! Application and run configuration.
//!
//! [`AppConfig`] is loaded from YAML, falling back to defaults when the file
//! does not exist. Environment variables override file values:
//! - `UNIBENCH_LOG_LEVEL`
//! - `UNIBENCH_LOG_FORMAT`
//! - `UNIBENCH_METRICS_FILE`
use std::{collections::BTreeMap, path::Path, path::PathBuf, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    adapter::{BackendAdapter, OffloadPolicy, RestSseAdapter},
    error::ConfigError,
    metric::QueryPattern,
};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Connection settings of one backend, tagged by protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    RestSse(RestSseConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestSseConfig {
    pub base_url: String,
    /// Request timeout in seconds, unless a command overrides it.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Durable log that every result is appended to.
    #[serde(default = "default_metrics_file")]
    pub output_file: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            output_file: default_metrics_file(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_poll_attempts() -> u32 {
    120
}

fn default_level() -> String {
    "info".to_string()
}

fn default_metrics_file() -> PathBuf {
    PathBuf::from("metrics.csv")
}

impl AppConfig {
    /// Parse a YAML file. A missing file yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load `path` and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override file values with whatever `lookup` returns for the
    /// `UNIBENCH_*` variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("UNIBENCH_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("UNIBENCH_LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.logging.format = format,
                Err(e) => tracing::warn!("Ignoring UNIBENCH_LOG_FORMAT: {e}"),
            }
        }

        if let Some(file) = lookup("UNIBENCH_METRICS_FILE") {
            self.metrics.output_file = PathBuf::from(file);
        }
    }

    /// Settings of backend `name`.
    pub fn backend(&self, name: &str) -> Result<&BackendConfig, ConfigError> {
        self.backends
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBackend {
                name: name.to_string(),
                available: self.backends.keys().cloned().collect(),
            })
    }
}

impl BackendConfig {
    /// Build the adapter for backend `name`, sharing `client` with every
    /// other adapter of the process.
    pub fn build(&self, name: &str, client: reqwest::Client) -> Arc<dyn BackendAdapter> {
        match self {
            BackendConfig::RestSse(c) => Arc::new(
                RestSseAdapter::builder()
                    .client(client)
                    .name(name)
                    .base_url(c.base_url.as_str())
                    .timeout(Duration::from_secs(c.timeout))
                    .offload(OffloadPolicy {
                        poll_interval: Duration::from_millis(c.poll_interval_ms),
                        max_attempts: c.max_poll_attempts,
                    })
                    .build(),
            ),
        }
    }

    /// Default per-request timeout for `query` and `load-test`.
    pub fn timeout(&self) -> Duration {
        match self {
            BackendConfig::RestSse(c) => Duration::from_secs(c.timeout),
        }
    }
}

/// Parameters of one load test, validated once before it starts.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct LoadTestConfig {
    #[builder(default = 100)]
    pub total_requests: usize,
    #[builder(default = 10)]
    pub concurrency: usize,
    #[builder(default = "default".to_string(), setter(into))]
    pub dataset: String,
    /// Connectors to target. Resolved from the backend when empty.
    #[builder(default)]
    pub connector_ids: Vec<String>,
    #[builder(default = QueryPattern::Sync)]
    pub pattern: QueryPattern,
    #[builder(default)]
    pub rows: Option<u64>,
    #[builder(default = crate::adapter::DEFAULT_TIMEOUT)]
    pub timeout: Duration,
    /// Durable log the raw results are appended to.
    #[builder(default = default_metrics_file(), setter(into))]
    pub output_file: PathBuf,
}

impl LoadTestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        Ok(())
    }
}
