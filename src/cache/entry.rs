// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;
use tokio::time::Instant;

use crate::eviction::{EntryMeta, SensitivityTag};
use crate::storage::SecondaryRecord;

/// A cached value as held by the local tier.
///
/// `payload` is stored already transformed; `checksum` covers the original
/// payload and is fixed at first write.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub encrypted: bool,
    pub compressed: bool,
    pub sensitivity: SensitivityTag,
    pub checksum: String,
    /// Insertion order, assigned by the local table
    pub(crate) seq: u64,
}

impl CacheEntry {
    /// Logically expired once strictly more than `ttl` has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    #[must_use]
    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.ttl.saturating_sub(now.saturating_duration_since(self.created_at))
    }

    /// Stored (post-transform) size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            sensitivity: self.sensitivity,
            access_count: self.access_count,
            created_at: self.created_at,
            seq: self.seq,
        }
    }

    /// Snapshot for the secondary tier, carrying the TTL left at `now`.
    #[must_use]
    pub fn to_record(&self, now: Instant, now_ms: u64) -> SecondaryRecord {
        SecondaryRecord {
            payload: self.payload.clone(),
            encrypted: self.encrypted,
            compressed: self.compressed,
            sensitivity: self.sensitivity,
            checksum: self.checksum.clone(),
            ttl_ms: self.remaining_ttl(now).as_millis() as u64,
            created_at_ms: now_ms,
        }
    }

    /// Rebuild a local entry from a secondary hit, restarting the clock with
    /// the record's remaining TTL.
    #[must_use]
    pub fn from_record(key: &str, record: SecondaryRecord, now: Instant, now_ms: u64) -> Self {
        let ttl = record.remaining_ttl(now_ms);
        Self {
            key: key.to_string(),
            payload: record.payload,
            created_at: now,
            ttl,
            access_count: 0,
            encrypted: record.encrypted,
            compressed: record.compressed,
            sensitivity: record.sensitivity,
            checksum: record.checksum,
            seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ttl_ms: u64) -> CacheEntry {
        CacheEntry {
            key: "k".into(),
            payload: b"v".to_vec(),
            created_at: Instant::now(),
            ttl: Duration::from_millis(ttl_ms),
            access_count: 0,
            encrypted: false,
            compressed: false,
            sensitivity: SensitivityTag::Medium,
            checksum: "abc".into(),
            seq: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_strict() {
        let e = entry(1_000);
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(!e.is_expired(Instant::now()));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(e.is_expired(Instant::now()));
        assert_eq!(e.remaining_ttl(Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_carries_remaining_ttl() {
        let e = entry(1_000);
        tokio::time::advance(Duration::from_millis(400)).await;

        let record = e.to_record(Instant::now(), 10_000);
        assert_eq!(record.ttl_ms, 600);
        assert_eq!(record.checksum, "abc");

        let back = CacheEntry::from_record("k", record, Instant::now(), 10_100);
        assert_eq!(back.ttl, Duration::from_millis(500));
        assert_eq!(back.sensitivity, SensitivityTag::Medium);
        assert_eq!(back.checksum, "abc");
    }
}
