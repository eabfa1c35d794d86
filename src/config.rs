// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the access engine.
//!
//! Configuration is supplied once at construction and is not mutable at
//! runtime. Durations are stored as millisecond integers so the structs
//! deserialize cleanly from JSON/YAML, with [`Duration`] accessors.
//!
//! # Example
//!
//! ```
//! use access_engine::EngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = EngineConfig::default();
//! assert_eq!(config.pool.max_connections, 10);
//! assert_eq!(config.cache.max_size, 1000);
//!
//! // Partial override
//! let config: EngineConfig = serde_json::from_str(
//!     r#"{"retry_attempts": 1, "pool": {"max_connections": 4}}"#,
//! ).unwrap();
//! assert_eq!(config.pool.max_connections, 4);
//! assert_eq!(config.pool.min_connections, 2);
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Rejected configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Default per-query timeout (overridable per plan)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay for linear backoff: `retry_delay * (attempt + 1)`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Connection pool sizing and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// How long `acquire` waits in the queue before `ConnectionTimeout`
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Free connections idle longer than this are reclaimed (above the minimum)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Interval for the background idle sweep (0 = disabled)
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

/// Tiered cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of local entries
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Redis connection string for the secondary tier (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub secondary_url: Option<String>,

    /// Key prefix for namespacing the secondary tier
    #[serde(default)]
    pub secondary_prefix: Option<String>,

    /// Hex-encoded 32-byte AES-256-GCM key. Required for `encrypt` writes.
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// zstd level used when `compress` is requested
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

/// Tunables for the priority eviction score.
#[derive(Debug, Clone, Deserialize)]
pub struct EvictionConfig {
    /// Fraction of entries removed per eviction sweep
    #[serde(default = "default_batch_fraction")]
    pub batch_fraction: f64,

    #[serde(default = "default_access_weight")]
    pub access_weight: f64,

    /// Cap on the access-count contribution
    #[serde(default = "default_max_access_bonus")]
    pub max_access_bonus: f64,

    /// Age at which the recency bonus reaches zero
    #[serde(default = "default_recency_window_ms")]
    pub recency_window_ms: u64,

    #[serde(default = "default_max_recency_bonus")]
    pub max_recency_bonus: f64,

    /// Score gap between adjacent sensitivity tags
    #[serde(default = "default_sensitivity_margin")]
    pub sensitivity_margin: f64,
}

fn default_query_timeout_ms() -> u64 { 30_000 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1_000 }
fn default_max_connections() -> usize { 10 }
fn default_min_connections() -> usize { 2 }
fn default_connection_timeout_ms() -> u64 { 5_000 }
fn default_idle_timeout_ms() -> u64 { 30_000 }
fn default_reap_interval_ms() -> u64 { 10_000 }
fn default_max_size() -> usize { 1_000 }
fn default_ttl_ms() -> u64 { 300_000 } // 5 minutes
fn default_compression_level() -> i32 { 3 }
fn default_batch_fraction() -> f64 { 0.2 }
fn default_access_weight() -> f64 { 1.0 }
fn default_max_access_bonus() -> f64 { 500.0 }
fn default_recency_window_ms() -> u64 { 6_000_000 } // 100 minutes
fn default_max_recency_bonus() -> f64 { 100.0 }
fn default_sensitivity_margin() -> f64 { 1_000.0 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            eviction: EvictionConfig::default(),
            query_timeout_ms: default_query_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            default_ttl_ms: default_ttl_ms(),
            secondary_url: None,
            secondary_prefix: None,
            encryption_key: None,
            compression_level: default_compression_level(),
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            batch_fraction: default_batch_fraction(),
            access_weight: default_access_weight(),
            max_access_bonus: default_max_access_bonus(),
            recency_window_ms: default_recency_window_ms(),
            max_recency_bonus: default_max_recency_bonus(),
            sensitivity_margin: default_sensitivity_margin(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.cache.validate()?;
        self.eviction.validate()
    }
}

impl PoolConfig {
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub fn reap_interval(&self) -> Option<Duration> {
        (self.reap_interval_ms > 0).then(|| Duration::from_millis(self.reap_interval_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("pool.max_connections must be > 0".into()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::Invalid(format!(
                "pool.min_connections ({}) exceeds pool.max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

impl CacheConfig {
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Decode the configured encryption key, if any.
    pub fn encryption_key_bytes(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        let Some(ref encoded) = self.encryption_key else {
            return Ok(None);
        };
        let bytes = hex::decode(encoded)
            .map_err(|e| ConfigError::Invalid(format!("cache.encryption_key is not hex: {}", e)))?;
        let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            ConfigError::Invalid(format!("cache.encryption_key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Some(key))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::Invalid("cache.max_size must be > 0".into()));
        }
        self.encryption_key_bytes().map(|_| ())
    }
}

impl EvictionConfig {
    #[must_use]
    pub fn recency_window(&self) -> Duration {
        Duration::from_millis(self.recency_window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.batch_fraction > 0.0 && self.batch_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "eviction.batch_fraction must be in (0, 1], got {}",
                self.batch_fraction
            )));
        }
        for (name, value) in [
            ("access_weight", self.access_weight),
            ("max_access_bonus", self.max_access_bonus),
            ("max_recency_bonus", self.max_recency_bonus),
            ("sensitivity_margin", self.sensitivity_margin),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::Invalid(format!(
                    "eviction.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        // Access and recency together must never bridge one sensitivity step
        let bonus_ceiling = self.max_access_bonus + self.max_recency_bonus;
        if self.sensitivity_margin <= bonus_ceiling {
            return Err(ConfigError::Invalid(format!(
                "eviction.sensitivity_margin ({}) must exceed max_access_bonus + max_recency_bonus ({})",
                self.sensitivity_margin, bonus_ceiling
            )));
        }
        Ok(())
    }
}
