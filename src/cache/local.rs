// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded local entry table.
//!
//! One mutex guards the map and the insertion counter. Eviction runs under
//! that same lock, so no insert can interleave with a sweep and the capacity
//! bound holds after every call.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

use super::entry::CacheEntry;
use crate::eviction::{PriorityPolicy, SensitivityTag};

pub(crate) enum Lookup {
    Hit(CacheEntry),
    /// Found but past its TTL; already removed
    Expired,
    Miss,
}

/// Result of an insert: keys evicted to make room.
pub(crate) struct Inserted {
    pub evicted: Vec<String>,
}

struct Table {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

pub(crate) struct LocalTable {
    table: Mutex<Table>,
    capacity: usize,
    policy: PriorityPolicy,
}

impl LocalTable {
    pub fn new(capacity: usize, policy: PriorityPolicy) -> Self {
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read and bump the access count; expired entries are removed.
    pub fn get(&self, key: &str, now: Instant) -> Lookup {
        let mut table = self.table.lock();
        let expired = match table.entries.get_mut(key) {
            None => return Lookup::Miss,
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.access_count += 1;
                return Lookup::Hit(entry.clone());
            }
        };
        if expired {
            table.entries.remove(key);
        }
        Lookup::Expired
    }

    /// Look without touching access counts (expired entries read as absent).
    pub fn peek(&self, key: &str, now: Instant) -> Option<CacheEntry> {
        let table = self.table.lock();
        table.entries.get(key).filter(|e| !e.is_expired(now)).cloned()
    }

    /// Insert or replace. A new key at capacity first evicts the
    /// lowest-scoring batch.
    pub fn insert(&self, mut entry: CacheEntry, now: Instant) -> Inserted {
        let mut table = self.table.lock();
        let mut evicted = Vec::new();

        let len = table.entries.len();
        if !table.entries.contains_key(&entry.key) && len >= self.capacity {
            let count = self.policy.batch_size(len).max(len + 1 - self.capacity);
            let metas: Vec<_> = table.entries.values().map(CacheEntry::meta).collect();
            evicted = self.policy.select_victims(&metas, count, now);
            for key in &evicted {
                table.entries.remove(key);
            }
        }

        entry.seq = table.next_seq;
        table.next_seq += 1;
        table.entries.insert(entry.key.clone(), entry);
        Inserted { evicted }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.table.lock().entries.remove(key).is_some()
    }

    /// Remove everything, or the keys matching `pattern`. Returns removed count.
    pub fn clear(&self, pattern: Option<&Regex>) -> usize {
        let mut table = self.table.lock();
        let before = table.entries.len();
        match pattern {
            None => table.entries.clear(),
            Some(re) => table.entries.retain(|key, _| !re.is_match(key)),
        }
        before - table.entries.len()
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn by_sensitivity(&self) -> BTreeMap<SensitivityTag, usize> {
        let table = self.table.lock();
        let mut counts: BTreeMap<SensitivityTag, usize> = SensitivityTag::ALL.iter().map(|t| (*t, 0)).collect();
        for entry in table.entries.values() {
            *counts.entry(entry.sensitivity).or_default() += 1;
        }
        counts
    }

    pub fn bytes(&self) -> usize {
        self.table.lock().entries.values().map(CacheEntry::size).sum()
    }
}
