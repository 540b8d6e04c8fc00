//! Configuration management for the cluster client
//!
//! Settings come from environment variables, an optional TOML file, and
//! command-line overrides applied by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

/// Default Consul agent address
pub const DEFAULT_CONSUL_URL: &str = "http://localhost:8500";

/// Default time budget of a waited event, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Consul agent configuration
    pub consul: ConsulConfig,

    /// Operation defaults
    pub operations: OperationsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Consul agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Agent HTTP API URL
    pub url: String,

    /// ACL token (optional)
    pub token: Option<String>,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Retry policy for reads
    pub retry: RetryConfig,
}

/// Defaults for deploy / migrate / move operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// How long to wait for a fired event to take effect, in seconds
    pub default_timeout_secs: u64,

    /// Delay between two store polls while waiting, in milliseconds
    pub poll_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            url: String::from(DEFAULT_CONSUL_URL),
            token: None,
            request_timeout_secs: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_ms: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let url = std::env::var("CLUSTER_CONSUL_URL")
            .or_else(|_| std::env::var("CONSUL_HTTP_ADDR"))
            .unwrap_or(defaults.consul.url);

        let token = std::env::var("CONSUL_HTTP_TOKEN").ok().filter(|t| !t.is_empty());

        let request_timeout_secs = std::env::var("CLUSTER_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.consul.request_timeout_secs);

        let default_timeout_secs = std::env::var("CLUSTER_DEFAULT_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.operations.default_timeout_secs);

        let poll_interval_ms = std::env::var("CLUSTER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.operations.poll_interval_ms);

        let level = std::env::var("CLUSTER_LOG_LEVEL").unwrap_or(defaults.logging.level);
        let format = std::env::var("CLUSTER_LOG_FORMAT").unwrap_or(defaults.logging.format);

        Ok(Self {
            consul: ConsulConfig {
                url,
                token,
                request_timeout_secs,
                retry: defaults.consul.retry,
            },
            operations: OperationsConfig {
                default_timeout_secs,
                poll_interval_ms,
            },
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.consul.url)
            .with_context(|| format!("Invalid Consul URL: {}", self.consul.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Consul URL must use http or https, got '{}'", url.scheme());
        }

        if self.consul.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.operations.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.consul.request_timeout_secs)
    }

    /// Get default wait timeout as Duration
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.operations.default_timeout_secs)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.operations.poll_interval_ms)
    }
}
