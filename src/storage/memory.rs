// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::glob_matcher;
use super::traits::{SecondaryRecord, SecondaryTier, TierError};

/// In-process secondary tier.
///
/// Useful when several caches in one process share a warm tier, and as the
/// test double for remote tiers: [`set_offline`](Self::set_offline) makes every
/// call fail with [`TierError::Unavailable`].
pub struct InMemoryTier {
    data: DashMap<String, (SecondaryRecord, Instant)>,
    offline: AtomicBool,
    calls: AtomicU64,
}

impl InMemoryTier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            offline: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Get current item count (including not-yet-reaped expired items)
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Simulate an outage
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total calls received (including failed ones)
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), TierError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.offline.load(Ordering::SeqCst) {
            return Err(TierError::Unavailable("in-memory tier offline".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecondaryTier for InMemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<SecondaryRecord>, TierError> {
        self.check()?;
        let hit = self.data.get(key).map(|r| r.value().clone());
        match hit {
            Some((_, expires_at)) if Instant::now() >= expires_at => {
                self.data.remove(key);
                Ok(None)
            }
            Some((record, _)) => Ok(Some(record)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, record: &SecondaryRecord, ttl: Duration) -> Result<(), TierError> {
        self.check()?;
        self.data.insert(key.to_string(), (record.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        self.check()?;
        self.data.remove(key);
        Ok(())
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<u64, TierError> {
        self.check()?;
        let Some(pattern) = pattern else {
            let count = self.data.len() as u64;
            self.data.clear();
            return Ok(count);
        };
        let matcher = glob_matcher(pattern).map_err(|e| TierError::Codec(e.to_string()))?;
        let before = self.data.len();
        self.data.retain(|key, _| !matcher.is_match(key));
        Ok(before.saturating_sub(self.data.len()) as u64)
    }
}
