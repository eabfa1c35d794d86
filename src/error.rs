// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the access engine.
//!
//! - [`CacheError`]: fatal cache failures (cipher, codec, integrity).
//!   Secondary-tier failures are *not* here; they degrade to local-only
//!   operation and surface as [`crate::cache::TierOutcome::Degraded`].
//! - [`AccessError`]: pool and execution failures seen by the orchestrator.
//! - [`AccessFailure`]: what callers of the orchestrator receive: the final
//!   error verbatim plus elapsed time and attempt count.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::pool::StoreError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("encryption requested but no cache.encryption_key is configured")]
    EncryptionUnavailable,

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error("compression failure: {0}")]
    Compression(String),

    #[error("Data corruption detected for '{key}': expected hash {expected}, got {actual}")]
    Corruption {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("invalid glob pattern '{0}'")]
    Pattern(String),
}

#[derive(Error, Debug)]
pub enum AccessError {
    /// Pool exhausted past `connection_timeout`
    #[error("connection timeout: no connection available after {waited:?}")]
    ConnectionTimeout { waited: Duration },

    /// Execution exceeded the per-call query timeout
    #[error("query timeout: execution exceeded {limit:?}")]
    QueryTimeout { limit: Duration },

    /// The backing store refused a new connection
    #[error("connection creation failed: {0}")]
    ConnectionCreation(#[source] StoreError),

    /// A batch step failed; the transaction was rolled back
    #[error("transaction failed at step {step}, rolled back: {source}")]
    TransactionFailure {
        step: usize,
        #[source]
        source: Box<AccessError>,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("pool '{0}' is closed")]
    PoolClosed(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AccessError {
    /// Whether the orchestrator may retry after this error.
    ///
    /// Transactions are never retried automatically: partial side effects
    /// outside the transaction are possible, so callers resubmit deliberately.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::QueryTimeout { .. }
                | Self::ConnectionCreation(_)
                | Self::Store(_)
        )
    }

    /// Stable short name, used for metric labels and the service surface.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionTimeout { .. } => "connection_timeout",
            Self::QueryTimeout { .. } => "query_timeout",
            Self::ConnectionCreation(_) => "connection_creation",
            Self::TransactionFailure { .. } => "transaction_failure",
            Self::Store(_) => "store",
            Self::Cache(_) => "cache",
            Self::Codec(_) => "codec",
            Self::PoolClosed(_) => "pool_closed",
            Self::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Final error handed to orchestrator callers.
#[derive(Error, Debug)]
#[error("{error} (after {elapsed:?}, {attempts} attempt(s))")]
pub struct AccessFailure {
    #[source]
    pub error: AccessError,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl AccessFailure {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}
