//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::rollup::TimeSlicePolicy;
use crate::server::{ServerOptions, MAX_INGEST_PERMITS};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which store backs the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::Invalid(format!(
                "unknown storage backend '{}'",
                other
            ))),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("strata").to_string_lossy().to_string())
        .unwrap_or_else(|| "./strata_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Data directory with a leading `~` expanded to the home directory
    pub fn data_path(&self) -> PathBuf {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.data_dir)),
            None => PathBuf::from(&self.data_dir),
        }
    }
}

/// Ingestion and rollup scheduling
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_ingest_permits")]
    pub ingest_permits: usize,

    #[serde(default = "default_aggregation_interval")]
    pub aggregation_interval_secs: u64,

    /// Install timestamp in epoch milliseconds; bounds the startup probe
    pub install_time: Option<i64>,
}

fn default_ingest_permits() -> usize {
    100
}

fn default_aggregation_interval() -> u64 {
    3600 // 1 hour
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            ingest_permits: default_ingest_permits(),
            aggregation_interval_secs: default_aggregation_interval(),
            install_time: None,
        }
    }
}

/// How many days each tier stays queryable
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_raw_days")]
    pub raw_days: i64,

    #[serde(default = "default_one_hour_days")]
    pub one_hour_days: i64,

    #[serde(default = "default_six_hour_days")]
    pub six_hour_days: i64,

    #[serde(default = "default_twenty_four_hour_days")]
    pub twenty_four_hour_days: i64,
}

fn default_raw_days() -> i64 {
    7
}

fn default_one_hour_days() -> i64 {
    14
}

fn default_six_hour_days() -> i64 {
    31
}

fn default_twenty_four_hour_days() -> i64 {
    365
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_days: default_raw_days(),
            one_hour_days: default_one_hour_days(),
            six_hour_days: default_six_hour_days(),
            twenty_four_hour_days: default_twenty_four_hour_days(),
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> Result<TimeSlicePolicy, ConfigError> {
        TimeSlicePolicy::new(
            retention_days("raw_days", self.raw_days)?,
            retention_days("one_hour_days", self.one_hour_days)?,
            retention_days("six_hour_days", self.six_hour_days)?,
            retention_days("twenty_four_hour_days", self.twenty_four_hour_days)?,
        )
        .map_err(ConfigError::Invalid)
    }
}

fn retention_days(field: &str, days: i64) -> Result<Duration, ConfigError> {
    Duration::try_days(days).ok_or_else(|| {
        ConfigError::Invalid(format!("retention.{} is out of range: {}", field, days))
    })
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8086
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse and validate TOML content
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("strata").join("config.toml")),
            Some(PathBuf::from("/etc/strata/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.ingest_permits == 0 {
            return Err(ConfigError::Invalid(
                "metrics.ingest_permits must be at least 1".to_string(),
            ));
        }
        if self.metrics.ingest_permits > MAX_INGEST_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "metrics.ingest_permits must be at most {}",
                MAX_INGEST_PERMITS
            )));
        }
        if self.metrics.aggregation_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "metrics.aggregation_interval_secs must be at least 1".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }
        self.retention.policy()?;
        Ok(())
    }

    /// Options for [`crate::server::MetricsServer`]
    pub fn server_options(&self) -> Result<ServerOptions, ConfigError> {
        Ok(ServerOptions {
            ingest_permits: self.metrics.ingest_permits,
            retention: self.retention.policy()?,
        })
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Storage overrides
        if let Ok(backend) = std::env::var("STRATA_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(b) => self.storage.backend = b,
                Err(e) => tracing::warn!("Ignoring STRATA_STORAGE_BACKEND: {}", e),
            }
        }
        if let Ok(data_dir) = std::env::var("STRATA_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }

        // Metrics overrides
        if let Ok(permits) = std::env::var("STRATA_INGEST_PERMITS") {
            if let Ok(p) = permits.parse() {
                self.metrics.ingest_permits = p;
            }
        }
        if let Ok(interval) = std::env::var("STRATA_AGGREGATION_INTERVAL_SECS") {
            if let Ok(i) = interval.parse() {
                self.metrics.aggregation_interval_secs = i;
            }
        }

        // API overrides
        if let Ok(host) = std::env::var("STRATA_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("STRATA_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("STRATA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("STRATA_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Strata Configuration
#
# Environment variables override these settings:
# - STRATA_STORAGE_BACKEND
# - STRATA_DATA_DIR
# - STRATA_INGEST_PERMITS
# - STRATA_AGGREGATION_INTERVAL_SECS
# - STRATA_API_HOST
# - STRATA_API_PORT
# - STRATA_LOG_LEVEL
# - STRATA_LOG_FORMAT

[storage]
# Backend: sqlite (durable) or memory (lost on restart)
backend = "sqlite"

# Directory holding metrics.db
data_dir = "~/.local/share/strata"

[metrics]
# Maximum raw inserts in flight at once
ingest_permits = 100

# How often the aggregation pass runs (seconds)
aggregation_interval_secs = 3600

# Install time in epoch milliseconds; the startup probe never looks earlier
# install_time = 1700000000000

[retention]
# Days each tier serves queries for; must be strictly increasing
raw_days = 7
one_hour_days = 14
six_hour_days = 31
twenty_four_hour_days = 365

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8086

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
