//! Configuration management for Slidewin.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `SLIDEWIN__<SECTION>__<KEY>` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SlidewinError};
use crate::ratelimit::RateLimiterOptions;

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "SLIDEWIN";

/// Main configuration for Slidewin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlidewinConfig {
    /// Backing store connection
    #[serde(default)]
    pub redis: RedisConfig,

    /// Rate limiter policy
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Redis connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Upper bound on a single store call in milliseconds; 0 disables it
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// The command timeout, if one is configured.
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_command_timeout_ms() -> u64 {
    500
}

/// Rate limiter policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Namespace for this limiter's keys
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum admitted requests per window
    #[serde(default = "default_limit_per_minute")]
    pub limit_per_minute: u64,

    /// Look-back duration in seconds
    #[serde(default = "default_window_interval_secs")]
    pub window_interval_secs: u64,

    /// Bucket granularity in seconds
    #[serde(default = "default_bucket_interval_secs")]
    pub bucket_interval_secs: u64,

    /// Attach `RateLimit-*` metadata to decisions
    #[serde(default)]
    pub write_headers: bool,

    /// Count but never throttle
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            limit_per_minute: default_limit_per_minute(),
            window_interval_secs: default_window_interval_secs(),
            bucket_interval_secs: default_bucket_interval_secs(),
            write_headers: false,
            dev_mode: false,
        }
    }
}

impl LimiterConfig {
    /// Convert to rate limiter options.
    pub fn to_options(&self) -> RateLimiterOptions {
        RateLimiterOptions {
            name: self.name.clone(),
            limit_per_minute: self.limit_per_minute,
            window_interval: Some(Duration::from_secs(self.window_interval_secs)),
            bucket_interval: Some(Duration::from_secs(self.bucket_interval_secs)),
            write_headers: self.write_headers,
            dev_mode: self.dev_mode,
        }
    }
}

fn default_name() -> String {
    "slidewin".to_string()
}

fn default_limit_per_minute() -> u64 {
    60
}

fn default_window_interval_secs() -> u64 {
    60
}

fn default_bucket_interval_secs() -> u64 {
    5
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl SlidewinConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| SlidewinError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}
