//! Configuration management for the aggregation engine
//!
//! TOML configuration files with per-field defaults, environment variable
//! overrides and validation. Pools are sized once from this configuration at
//! startup.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Read/write worker pools
    #[serde(default)]
    pub pools: PoolConfig,

    /// In-memory storage backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Aggregation result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Threads serving fetches
    #[serde(default = "default_read_threads")]
    pub read_threads: usize,

    /// Threads serving writes
    #[serde(default = "default_write_threads")]
    pub write_threads: usize,

    /// Maximum queued read tasks before rejecting
    #[serde(default = "default_queue")]
    pub read_queue: usize,

    /// Maximum queued write tasks before rejecting
    #[serde(default = "default_queue")]
    pub write_queue: usize,
}

/// Storage backend settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Width of one storage row (shard) in milliseconds
    #[serde(default = "default_row_width_ms")]
    pub row_width_ms: i64,

    /// Whether the backend serves requests
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Result cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Enable write-through caching of query results
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of cache keys kept
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_read_threads() -> usize {
    num_cpus::get()
}
fn default_write_threads() -> usize {
    (num_cpus::get() / 2).max(1)
}
fn default_queue() -> usize {
    10_000
}
/// Three weeks
fn default_row_width_ms() -> i64 {
    1_814_400_000
}
fn default_cache_capacity() -> usize {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            read_threads: default_read_threads(),
            write_threads: default_write_threads(),
            read_queue: default_queue(),
            write_queue: default_queue(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            row_width_ms: default_row_width_ms(),
            enabled: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        toml::from_str(&contents).map_err(|e| {
            Error::configuration(format!(
                "failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Pools
        if let Some(n) = env_parse("KUBA_READ_THREADS") {
            self.pools.read_threads = n;
        }
        if let Some(n) = env_parse("KUBA_WRITE_THREADS") {
            self.pools.write_threads = n;
        }

        // Backend
        if let Some(width) = env_parse("KUBA_ROW_WIDTH_MS") {
            self.backend.row_width_ms = width;
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pools.read_threads == 0 || self.pools.write_threads == 0 {
            return Err(Error::configuration("pool thread counts must be > 0"));
        }
        if self.pools.read_queue == 0 || self.pools.write_queue == 0 {
            return Err(Error::configuration("pool queue capacities must be > 0"));
        }
        if self.backend.row_width_ms <= 0 {
            return Err(Error::configuration("backend row width must be > 0"));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(Error::configuration("enabled cache needs a capacity > 0"));
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

mod num_cpus {
    pub fn get() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}
