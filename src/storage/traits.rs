// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::eviction::SensitivityTag;

/// Secondary-tier failure. Never surfaced to cache callers; the cache
/// degrades to local-only operation and records a metric instead.
#[derive(Error, Debug, Clone)]
pub enum TierError {
    #[error("secondary tier unavailable: {0}")]
    Unavailable(String),
    #[error("secondary tier record could not be decoded: {0}")]
    Codec(String),
}

/// Wire snapshot of a cache entry held by a secondary tier.
///
/// The payload is stored already transformed (compressed and/or encrypted);
/// the checksum is the one computed at first write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryRecord {
    pub payload: Vec<u8>,
    pub encrypted: bool,
    pub compressed: bool,
    pub sensitivity: SensitivityTag,
    pub checksum: String,
    pub ttl_ms: u64,
    /// Creation time (epoch millis)
    pub created_at_ms: u64,
}

/// Current wall-clock time in epoch millis
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl SecondaryRecord {
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > self.ttl_ms
    }

    /// TTL left at `now_ms` (zero once expired)
    #[must_use]
    pub fn remaining_ttl(&self, now_ms: u64) -> Duration {
        let age = now_ms.saturating_sub(self.created_at_ms);
        Duration::from_millis(self.ttl_ms.saturating_sub(age))
    }

    pub fn to_json(&self) -> Result<String, TierError> {
        serde_json::to_string(self).map_err(|e| TierError::Codec(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, TierError> {
        serde_json::from_str(raw).map_err(|e| TierError::Codec(e.to_string()))
    }
}

/// Remote key/value/TTL store consulted on local miss.
#[async_trait]
pub trait SecondaryTier: Send + Sync {
    /// Short name for logs and metric labels
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<SecondaryRecord>, TierError>;
    async fn put(&self, key: &str, record: &SecondaryRecord, ttl: Duration) -> Result<(), TierError>;
    async fn delete(&self, key: &str) -> Result<(), TierError>;

    /// Remove keys matching a `*` glob (`None` = everything). Returns keys removed.
    async fn clear(&self, pattern: Option<&str>) -> Result<u64, TierError>;

    async fn ping(&self) -> Result<(), TierError> {
        Ok(())
    }
}
