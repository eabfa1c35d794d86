// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-tier cache: a bounded local table plus an optional secondary tier.
//!
//! ```text
//!              get                                    set
//!               │                                      │
//!               ▼                                      ▼
//!   ┌───────────────────────┐        compress → encrypt → checksum(original)
//!   │ local (bounded, TTL)  │◄── repopulate ──┐        │
//!   └───────────┬───────────┘                 │        ▼
//!               │ miss / expired              │   local insert (evict 20% at capacity)
//!               ▼                             │        │
//!   ┌───────────────────────┐                 │        ▼ background, best-effort
//!   │ secondary (optional)  │─────── hit ─────┘   secondary put (not for High entries)
//!   └───────────────────────┘
//! ```
//!
//! Secondary-tier failures never reach the caller as errors. They surface as
//! [`TierOutcome::Degraded`] and increment a metric; the local tier keeps
//! serving. Calls to the secondary tier go through a circuit breaker so a dead
//! tier costs one fast rejection per call instead of a network timeout.
//!
//! Background mirrors are chained per key: a mirror starts only after the
//! previous mirror of the same key has finished, and `delete`/`clear` wait for
//! pending mirrors of the keys they remove before touching the secondary tier.
//! A removed key therefore cannot be written back by a mirror that was still
//! in flight, and overwrites reach the secondary tier in call order.

pub mod entry;
pub(crate) mod local;
pub mod transform;

pub use entry::CacheEntry;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{CacheConfig, ConfigError, EvictionConfig};
use crate::error::CacheError;
use crate::eviction::{PriorityPolicy, SensitivityTag};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitState};
use crate::storage::traits::epoch_millis;
use crate::storage::{glob_matcher, SecondaryTier, TierError};
use local::{LocalTable, Lookup};
use transform::PayloadCodec;

/// Result of an operation that touched the secondary tier.
///
/// `Degraded` carries the value served from the local tier alone plus the
/// reason the secondary tier could not take part.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome<T> {
    Ok(T),
    Degraded { value: T, reason: String },
}

impl<T> TierOutcome<T> {
    #[must_use]
    pub fn value(&self) -> &T {
        match self {
            Self::Ok(v) | Self::Degraded { value: v, .. } => v,
        }
    }

    #[must_use]
    pub fn into_value(self) -> T {
        match self {
            Self::Ok(v) | Self::Degraded { value: v, .. } => v,
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TierOutcome<U> {
        match self {
            Self::Ok(v) => TierOutcome::Ok(f(v)),
            Self::Degraded { value, reason } => TierOutcome::Degraded { value: f(value), reason },
        }
    }
}

/// Per-write options.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Falls back to the cache's default TTL
    pub ttl: Option<Duration>,
    pub sensitivity: SensitivityTag,
    pub encrypt: bool,
    pub compress: bool,
}

impl SetOptions {
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn sensitivity(mut self, tag: SensitivityTag) -> Self {
        self.sensitivity = tag;
        self
    }

    #[must_use]
    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }

    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before any lookup
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Decayed moving average of get/set latency
    pub avg_latency_ms: f64,
    pub entry_count: usize,
    pub by_sensitivity: BTreeMap<SensitivityTag, usize>,
    pub bytes: usize,
    pub evictions: u64,
    pub expirations: u64,
    pub secondary_failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    avg_latency_ms: Option<f64>,
}

impl Counters {
    fn observe_latency(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1_000.0;
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => avg * 0.9 + sample_ms * 0.1,
            None => sample_ms,
        });
    }
}

struct Secondary {
    tier: Arc<dyn SecondaryTier>,
    circuit: Arc<CircuitBreaker>,
}

pub struct TieredCache {
    local: LocalTable,
    secondary: Option<Secondary>,
    codec: PayloadCodec,
    default_ttl: Duration,
    counters: Mutex<Counters>,
    secondary_failures: Arc<AtomicU64>,
    /// Latest pending mirror per key
    mirrors: Mutex<HashMap<String, JoinHandle<()>>>,
}

async fn settle(pending: impl IntoIterator<Item = JoinHandle<()>>) {
    for handle in pending {
        if let Err(e) = handle.await {
            warn!(error = %e, "Secondary mirror task did not finish");
        }
    }
}

fn tier_failure(err: CircuitError<TierError>) -> String {
    match err {
        CircuitError::Open(_) => "secondary tier circuit open".to_string(),
        CircuitError::Failed(e) => e.to_string(),
    }
}

impl TieredCache {
    /// Local-only cache. Fails on a malformed encryption key or eviction tuning.
    pub fn new(config: &CacheConfig, eviction: &EvictionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        eviction.validate()?;
        let key = config.encryption_key_bytes()?;
        Ok(Self {
            local: LocalTable::new(config.max_size, PriorityPolicy::from_config(eviction)),
            secondary: None,
            codec: PayloadCodec::new(key.as_ref(), config.compression_level),
            default_ttl: config.default_ttl(),
            counters: Mutex::new(Counters::default()),
            secondary_failures: Arc::new(AtomicU64::new(0)),
            mirrors: Mutex::new(HashMap::new()),
        })
    }

    /// Attach a secondary tier.
    #[must_use]
    pub fn with_secondary(self, tier: Arc<dyn SecondaryTier>) -> Self {
        self.with_secondary_circuit(tier, CircuitConfig::secondary_tier())
    }

    #[must_use]
    pub fn with_secondary_circuit(mut self, tier: Arc<dyn SecondaryTier>, circuit: CircuitConfig) -> Self {
        self.attach_secondary(tier, circuit);
        self
    }

    /// Attach (or replace) the secondary tier in place.
    pub fn attach_secondary(&mut self, tier: Arc<dyn SecondaryTier>, circuit: CircuitConfig) {
        let name = format!("secondary_{}", tier.name());
        debug!(tier = %tier.name(), "Secondary cache tier attached");
        self.secondary = Some(Secondary {
            tier,
            circuit: Arc::new(CircuitBreaker::new(name, circuit)),
        });
    }

    #[must_use]
    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// State of the breaker guarding the secondary tier, if one is attached.
    #[must_use]
    pub fn secondary_circuit(&self) -> Option<CircuitState> {
        self.secondary.as_ref().map(|s| s.circuit.state())
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.local.capacity()
    }

    /// Local entry count
    #[must_use]
    pub fn size(&self) -> usize {
        self.local.len()
    }

    /// Whether a live (unexpired) local entry exists. Doesn't count as an access.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.local.peek(key, Instant::now()).is_some()
    }

    /// Fetch a value, consulting the secondary tier on local miss.
    #[tracing::instrument(skip(self), fields(tier))]
    pub async fn get(&self, key: &str) -> Result<TierOutcome<Option<Vec<u8>>>, CacheError> {
        let started = Instant::now();
        let outcome = self.lookup(key).await;
        self.counters.lock().observe_latency(started.elapsed());

        let outcome = outcome?;
        let decoded = match outcome.value() {
            Some(entry) => Some(self.codec.decode(&entry.payload, entry.compressed, entry.encrypted)?),
            None => None,
        };
        Ok(match outcome {
            TierOutcome::Ok(_) => TierOutcome::Ok(decoded),
            TierOutcome::Degraded { reason, .. } => TierOutcome::Degraded { value: decoded, reason },
        })
    }

    /// Like [`get`](Self::get), then verify the restored payload against the
    /// checksum taken at first write.
    pub async fn get_verified(&self, key: &str) -> Result<TierOutcome<Option<Vec<u8>>>, CacheError> {
        let started = Instant::now();
        let outcome = self.lookup(key).await;
        self.counters.lock().observe_latency(started.elapsed());

        let outcome = outcome?;
        let decoded = match outcome.value() {
            Some(entry) => {
                let payload = self.codec.decode(&entry.payload, entry.compressed, entry.encrypted)?;
                let actual = transform::checksum(&payload);
                if actual != entry.checksum {
                    crate::metrics::record_corruption(key);
                    warn!(key, expected = %entry.checksum, actual = %actual, "Cache checksum mismatch");
                    return Err(CacheError::Corruption {
                        key: key.to_string(),
                        expected: entry.checksum.clone(),
                        actual,
                    });
                }
                Some(payload)
            }
            None => None,
        };
        Ok(match outcome {
            TierOutcome::Ok(_) => TierOutcome::Ok(decoded),
            TierOutcome::Degraded { reason, .. } => TierOutcome::Degraded { value: decoded, reason },
        })
    }

    async fn lookup(&self, key: &str) -> Result<TierOutcome<Option<CacheEntry>>, CacheError> {
        match self.local.get(key, Instant::now()) {
            Lookup::Hit(entry) => {
                tracing::Span::current().record("tier", "local");
                self.counters.lock().hits += 1;
                crate::metrics::record_cache_lookup("local", "hit");
                return Ok(TierOutcome::Ok(Some(entry)));
            }
            Lookup::Expired => {
                self.counters.lock().expirations += 1;
                crate::metrics::record_expiration("local");
                debug!(key, "Local entry expired");
            }
            Lookup::Miss => {}
        }

        let Some(secondary) = &self.secondary else {
            self.record_miss();
            return Ok(TierOutcome::Ok(None));
        };

        let tier = &secondary.tier;
        let fetched = secondary.circuit.call(|| tier.get(key)).await;
        match fetched {
            Ok(Some(record)) => {
                let now_ms = epoch_millis();
                if record.is_expired(now_ms) {
                    self.counters.lock().expirations += 1;
                    crate::metrics::record_expiration("secondary");
                    self.record_miss();
                    let removal = secondary.circuit.call(|| tier.delete(key)).await;
                    return Ok(match removal {
                        Ok(()) => TierOutcome::Ok(None),
                        Err(e) => self.degraded("delete", tier_failure(e), None),
                    });
                }

                let now = Instant::now();
                let entry = CacheEntry::from_record(key, record, now, now_ms);
                let inserted = self.local.insert(entry.clone(), now);
                self.note_evictions(inserted.evicted.len());

                tracing::Span::current().record("tier", "secondary");
                self.counters.lock().hits += 1;
                crate::metrics::record_cache_lookup("secondary", "hit");
                Ok(TierOutcome::Ok(Some(entry)))
            }
            Ok(None) => {
                self.record_miss();
                Ok(TierOutcome::Ok(None))
            }
            Err(e) => {
                self.record_miss();
                Ok(self.degraded("get", tier_failure(e), None))
            }
        }
    }

    /// Store a value. Mirrors to the secondary tier in the background unless
    /// the entry is high-sensitivity.
    #[tracing::instrument(skip(self, value, options), fields(sensitivity = %options.sensitivity))]
    pub async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> Result<(), CacheError> {
        let started = Instant::now();
        let result = self.store(key, value, &options);
        self.counters.lock().observe_latency(started.elapsed());
        result
    }

    fn store(&self, key: &str, value: &[u8], options: &SetOptions) -> Result<(), CacheError> {
        let checksum = transform::checksum(value);
        let payload = self.codec.encode(value, options.compress, options.encrypt)?;
        let now = Instant::now();

        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            created_at: now,
            ttl: options.ttl.unwrap_or(self.default_ttl),
            access_count: 0,
            encrypted: options.encrypt,
            compressed: options.compress,
            sensitivity: options.sensitivity,
            checksum,
            seq: 0,
        };

        let record = entry.to_record(now, epoch_millis());
        let ttl = entry.ttl;
        let inserted = self.local.insert(entry, now);
        self.note_evictions(inserted.evicted.len());
        crate::metrics::record_cache_write(options.sensitivity);
        crate::metrics::set_cache_entries(self.local.len());

        if let Some(secondary) = &self.secondary {
            if options.sensitivity.allows_secondary() {
                let tier = Arc::clone(&secondary.tier);
                let circuit = Arc::clone(&secondary.circuit);
                let failures = Arc::clone(&self.secondary_failures);
                let owned_key = key.to_string();

                let mut mirrors = self.mirrors.lock();
                mirrors.retain(|_, handle| !handle.is_finished());
                let previous = mirrors.remove(key);
                let handle = tokio::spawn(async move {
                    if let Some(previous) = previous {
                        let _ = previous.await;
                    }
                    if let Err(e) = circuit.call(|| tier.put(&owned_key, &record, ttl)).await {
                        failures.fetch_add(1, Ordering::Relaxed);
                        crate::metrics::record_secondary_failure("put");
                        warn!(key = %owned_key, error = %tier_failure(e), "Secondary mirror failed, serving local only");
                    }
                });
                mirrors.insert(key.to_string(), handle);
            }
        }
        Ok(())
    }

    /// Remove from both tiers. Missing keys are fine.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> TierOutcome<bool> {
        let removed = self.local.remove(key);
        crate::metrics::set_cache_entries(self.local.len());

        let Some(secondary) = &self.secondary else {
            return TierOutcome::Ok(removed);
        };
        let pending = self.mirrors.lock().remove(key);
        settle(pending).await;

        let tier = &secondary.tier;
        match secondary.circuit.call(|| tier.delete(key)).await {
            Ok(()) => TierOutcome::Ok(removed),
            Err(e) => self.degraded("delete", tier_failure(e), removed),
        }
    }

    /// Remove every key, or those matching a `*` glob, from both tiers.
    /// Returns the number of local entries removed.
    pub async fn clear(&self, pattern: Option<&str>) -> Result<TierOutcome<usize>, CacheError> {
        let matcher = pattern
            .map(|p| glob_matcher(p).map_err(|e| CacheError::Pattern(format!("{}: {}", p, e))))
            .transpose()?;
        let removed = self.local.clear(matcher.as_ref());
        crate::metrics::set_cache_entries(self.local.len());

        let Some(secondary) = &self.secondary else {
            return Ok(TierOutcome::Ok(removed));
        };
        let pending = self.take_mirrors(|key| matcher.as_ref().map_or(true, |re| re.is_match(key)));
        settle(pending).await;

        let tier = &secondary.tier;
        Ok(match secondary.circuit.call(|| tier.clear(pattern)).await {
            Ok(remote) => {
                debug!(local = removed, remote, "Cache cleared");
                TierOutcome::Ok(removed)
            }
            Err(e) => self.degraded("clear", tier_failure(e), removed),
        })
    }

    /// Return the cached value for `key`, or run `producer`, cache its output
    /// and return it.
    pub async fn memoize<F, Fut, E>(&self, key: &str, options: SetOptions, producer: F) -> Result<Vec<u8>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
        E: From<CacheError>,
    {
        if let Some(hit) = self.get(key).await?.into_value() {
            return Ok(hit);
        }
        let value = producer().await?;
        self.set(key, &value, options).await?;
        Ok(value)
    }

    /// Wait for in-flight background writes to the secondary tier.
    pub async fn flush_mirrors(&self) {
        let pending = self.take_mirrors(|_| true);
        settle(pending).await;
    }

    fn take_mirrors(&self, mut matches: impl FnMut(&str) -> bool) -> Vec<JoinHandle<()>> {
        let mut mirrors = self.mirrors.lock();
        let keys: Vec<String> = mirrors.keys().filter(|key| matches(key)).cloned().collect();
        keys.into_iter().filter_map(|key| mirrors.remove(&key)).collect()
    }

    #[must_use]
    pub fn secondary_failures(&self) -> u64 {
        self.secondary_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let counters = self.counters.lock();
        let lookups = counters.hits + counters.misses;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            (counters.hits as f64 / lookups as f64, counters.misses as f64 / lookups as f64)
        };

        CacheMetrics {
            hits: counters.hits,
            misses: counters.misses,
            hit_rate,
            miss_rate,
            avg_latency_ms: counters.avg_latency_ms.unwrap_or(0.0),
            entry_count: self.local.len(),
            by_sensitivity: self.local.by_sensitivity(),
            bytes: self.local.bytes(),
            evictions: counters.evictions,
            expirations: counters.expirations,
            secondary_failures: self.secondary_failures(),
        }
    }

    fn record_miss(&self) {
        self.counters.lock().misses += 1;
        crate::metrics::record_cache_lookup("all", "miss");
    }

    fn note_evictions(&self, count: usize) {
        if count > 0 {
            self.counters.lock().evictions += count as u64;
            crate::metrics::record_eviction(count);
            debug!(count, "Evicted local entries");
        }
    }

    /// Count a secondary-tier failure that happened outside a cache call,
    /// such as the tier being unreachable at start-up.
    pub(crate) fn note_secondary_failure(&self, operation: &str) {
        self.secondary_failures.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_secondary_failure(operation);
    }

    fn degraded<T>(&self, operation: &str, reason: String, value: T) -> TierOutcome<T> {
        self.note_secondary_failure(operation);
        warn!(operation, reason = %reason, "Secondary tier unavailable, serving local only");
        TierOutcome::Degraded { value, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryTier;

    fn small_cache(max_size: usize) -> TieredCache {
        let config = CacheConfig {
            max_size,
            encryption_key: Some("11".repeat(32)),
            ..Default::default()
        };
        TieredCache::new(&config, &EvictionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = small_cache(10);
        cache.set("k", b"v", SetOptions::default()).await.unwrap();

        let got = cache.get("k").await.unwrap();
        assert_eq!(got, TierOutcome::Ok(Some(b"v".to_vec())));
        assert!(cache.get("missing").await.unwrap().into_value().is_none());

        let m = cache.metrics();
        assert_eq!(m.hits, 1);
        assert_eq!(m.misses, 1);
        assert!((m.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_metrics_before_any_lookup() {
        let cache = small_cache(10);
        let m = cache.metrics();
        assert_eq!(m.hit_rate, 0.0);
        assert_eq!(m.miss_rate, 0.0);
        assert_eq!(m.entry_count, 0);
    }

    #[tokio::test]
    async fn test_encrypted_compressed_roundtrip_and_verify() {
        let cache = small_cache(10);
        let value = b"sensitive sensitive sensitive sensitive".to_vec();
        let options = SetOptions::default()
            .encrypted()
            .compressed()
            .sensitivity(SensitivityTag::High);
        cache.set("secret", &value, options).await.unwrap();

        let got = cache.get_verified("secret").await.unwrap().into_value();
        assert_eq!(got, Some(value));
    }

    #[tokio::test]
    async fn test_encrypt_without_key_is_fatal() {
        let cache = TieredCache::new(&CacheConfig::default(), &EvictionConfig::default()).unwrap();
        let err = cache.set("k", b"v", SetOptions::default().encrypted()).await.unwrap_err();
        assert!(matches!(err, CacheError::EncryptionUnavailable));
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_counts() {
        let cache = small_cache(10);
        cache
            .set("k", b"v", SetOptions::default().ttl(Duration::from_millis(50)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(51)).await;

        assert!(cache.get("k").await.unwrap().into_value().is_none());
        assert_eq!(cache.metrics().expirations, 1);
        assert!(!cache.contains("k"));
    }

    #[tokio::test]
    async fn test_high_sensitivity_not_mirrored() {
        let tier = Arc::new(InMemoryTier::new());
        let cache = small_cache(10).with_secondary(tier.clone());

        cache.set("public", b"a", SetOptions::default()).await.unwrap();
        cache
            .set("private", b"b", SetOptions::default().sensitivity(SensitivityTag::High))
            .await
            .unwrap();
        cache.flush_mirrors().await;

        assert!(tier.contains("public"));
        assert!(!tier.contains("private"));
    }

    #[tokio::test]
    async fn test_memoize_runs_producer_once() {
        let cache = small_cache(10);
        let calls = AtomicU64::new(0);

        for _ in 0..3 {
            let value: Result<Vec<u8>, CacheError> = cache
                .memoize("report", SetOptions::default(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(b"expensive".to_vec())
                })
                .await;
            assert_eq!(value.unwrap(), b"expensive");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_pattern() {
        let cache = small_cache(10);
        for key in ["user:1", "user:2", "order:1"] {
            cache.set(key, b"x", SetOptions::default()).await.unwrap();
        }
        let removed = cache.clear(Some("user:*")).await.unwrap();
        assert_eq!(removed, TierOutcome::Ok(2));
        assert!(cache.contains("order:1"));
    }

    #[test]
    fn test_tier_outcome_helpers() {
        let degraded = TierOutcome::Degraded { value: 2, reason: "down".into() };
        assert!(degraded.is_degraded());
        assert_eq!(*degraded.value(), 2);
        assert_eq!(degraded.map(|v| v * 2).into_value(), 4);
        assert!(!TierOutcome::Ok(1).is_degraded());
    }
}
