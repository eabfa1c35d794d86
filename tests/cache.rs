//! Tiered cache behavior: TTL, tiering, degradation, eviction, integrity.
//!
//! Run with: `cargo test --test cache`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use access_engine::storage::traits::epoch_millis;
use access_engine::{
    CacheConfig, CacheError, CircuitConfig, CircuitState, EvictionConfig, InMemoryTier, SecondaryRecord, SecondaryTier,
    SensitivityTag, SetOptions, TierError, TierOutcome, TieredCache,
};

const KEY_HEX: &str = "2b7e151628aed2a6abf7158809cf4f3c2b7e151628aed2a6abf7158809cf4f3c";

fn cache(max_size: usize) -> TieredCache {
    let config = CacheConfig {
        max_size,
        encryption_key: Some(KEY_HEX.to_string()),
        ..Default::default()
    };
    TieredCache::new(&config, &EvictionConfig::default()).unwrap()
}

fn shared_pair() -> (TieredCache, TieredCache, Arc<InMemoryTier>) {
    let tier = Arc::new(InMemoryTier::new());
    (cache(100).with_secondary(tier.clone()), cache(100).with_secondary(tier.clone()), tier)
}

// =============================================================================
// TTL
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_round_trip_then_expiry_without_resurrection() {
    let cache = cache(10);
    cache
        .set("k", b"v", SetOptions::default().ttl(Duration::from_millis(1_000)))
        .await
        .unwrap();

    assert_eq!(cache.get("k").await.unwrap().into_value(), Some(b"v".to_vec()));

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(cache.get("k").await.unwrap().into_value(), None);
    assert_eq!(cache.get("k").await.unwrap().into_value(), None);
    assert_eq!(cache.size(), 0);
}

#[tokio::test]
async fn test_expired_secondary_record_is_removed() {
    let tier = Arc::new(InMemoryTier::new());
    let cache = cache(10).with_secondary(tier.clone());

    let stale = SecondaryRecord {
        payload: b"old".to_vec(),
        encrypted: false,
        compressed: false,
        sensitivity: SensitivityTag::Low,
        checksum: String::new(),
        ttl_ms: 1_000,
        created_at_ms: epoch_millis() - 5_000,
    };
    tier.put("stale", &stale, Duration::from_secs(60)).await.unwrap();

    assert_eq!(cache.get("stale").await.unwrap(), TierOutcome::Ok(None));
    assert!(!tier.contains("stale"));
    assert!(!cache.contains("stale"));
    assert_eq!(cache.metrics().expirations, 1);
}

// =============================================================================
// Tiering
// =============================================================================

#[tokio::test]
async fn test_secondary_hit_repopulates_local() {
    let (writer, reader, tier) = shared_pair();
    writer.set("user:1", b"ada", SetOptions::default()).await.unwrap();
    writer.flush_mirrors().await;
    assert!(tier.contains("user:1"));

    assert!(!reader.contains("user:1"));
    let got = reader.get("user:1").await.unwrap();
    assert_eq!(got, TierOutcome::Ok(Some(b"ada".to_vec())));
    assert!(reader.contains("user:1"));

    // Served locally from now on
    let calls = tier.calls();
    reader.get("user:1").await.unwrap();
    assert_eq!(tier.calls(), calls);
    assert_eq!(reader.metrics().hits, 2);
}

#[tokio::test]
async fn test_encrypted_entry_shared_through_secondary() {
    let (writer, reader, tier) = shared_pair();
    let secret = b"card=4111111111111111".to_vec();
    writer
        .set("pay:1", &secret, SetOptions::default().encrypted().sensitivity(SensitivityTag::Medium))
        .await
        .unwrap();
    writer.flush_mirrors().await;

    let raw = tier.get("pay:1").await.unwrap().unwrap();
    assert!(raw.encrypted);
    assert_ne!(raw.payload, secret);

    assert_eq!(reader.get_verified("pay:1").await.unwrap().into_value(), Some(secret));
}

#[tokio::test]
async fn test_high_sensitivity_stays_local() {
    let (writer, reader, tier) = shared_pair();
    writer
        .set("ssn:1", b"123-45-6789", SetOptions::default().sensitivity(SensitivityTag::High))
        .await
        .unwrap();
    writer.flush_mirrors().await;

    assert!(!tier.contains("ssn:1"));
    assert_eq!(reader.get("ssn:1").await.unwrap().into_value(), None);
    assert!(writer.contains("ssn:1"));
}

#[tokio::test]
async fn test_delete_and_clear_reach_both_tiers() {
    let (writer, _, tier) = shared_pair();
    for key in ["a:1", "a:2", "b:1"] {
        writer.set(key, b"x", SetOptions::default()).await.unwrap();
    }
    writer.flush_mirrors().await;

    assert_eq!(writer.delete("a:1").await, TierOutcome::Ok(true));
    assert_eq!(writer.delete("a:1").await, TierOutcome::Ok(false));
    assert!(!tier.contains("a:1"));

    assert_eq!(writer.clear(Some("a:*")).await.unwrap(), TierOutcome::Ok(1));
    assert!(!tier.contains("a:2"));
    assert!(tier.contains("b:1"));
}

/// Shared tier whose first write takes a while to land.
struct SlowFirstPut {
    inner: InMemoryTier,
    first: AtomicBool,
}

impl SlowFirstPut {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryTier::new(),
            first: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl SecondaryTier for SlowFirstPut {
    fn name(&self) -> &str {
        "slow"
    }

    async fn get(&self, key: &str) -> Result<Option<SecondaryRecord>, TierError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, record: &SecondaryRecord, ttl: Duration) -> Result<(), TierError> {
        if self.first.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.put(key, record, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        self.inner.delete(key).await
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<u64, TierError> {
        self.inner.clear(pattern).await
    }
}

fn slow_pair() -> (TieredCache, TieredCache, Arc<SlowFirstPut>) {
    let tier = SlowFirstPut::new();
    (cache(100).with_secondary(tier.clone()), cache(100).with_secondary(tier.clone()), tier)
}

#[tokio::test(start_paused = true)]
async fn test_delete_waits_for_pending_mirror() {
    let (writer, reader, tier) = slow_pair();

    writer.set("k", b"v", SetOptions::default()).await.unwrap();
    assert_eq!(writer.delete("k").await, TierOutcome::Ok(true));
    writer.flush_mirrors().await;

    assert!(!tier.inner.contains("k"));
    assert_eq!(reader.get("k").await.unwrap().into_value(), None);
}

#[tokio::test(start_paused = true)]
async fn test_clear_waits_for_pending_mirror() {
    let (writer, reader, tier) = slow_pair();

    writer.set("user:1", b"v", SetOptions::default()).await.unwrap();
    writer.set("order:1", b"v", SetOptions::default()).await.unwrap();
    assert_eq!(writer.clear(Some("user:*")).await.unwrap(), TierOutcome::Ok(1));
    writer.flush_mirrors().await;

    assert!(!tier.inner.contains("user:1"));
    assert!(tier.inner.contains("order:1"));
    assert_eq!(reader.get("user:1").await.unwrap().into_value(), None);
}

#[tokio::test(start_paused = true)]
async fn test_overwrites_reach_secondary_in_order() {
    let (writer, reader, _) = slow_pair();

    writer.set("k", b"first", SetOptions::default()).await.unwrap();
    writer.set("k", b"second", SetOptions::default()).await.unwrap();
    writer.flush_mirrors().await;

    assert_eq!(reader.get("k").await.unwrap().into_value(), Some(b"second".to_vec()));
}

// =============================================================================
// Degradation
// =============================================================================

#[tokio::test]
async fn test_secondary_outage_degrades_to_local() {
    let tier = Arc::new(InMemoryTier::new());
    tier.set_offline(true);
    let cache = cache(10).with_secondary(tier.clone());

    cache.set("k", b"v", SetOptions::default()).await.unwrap();
    cache.flush_mirrors().await;
    assert_eq!(cache.secondary_failures(), 1);

    // Local hit never touches the secondary tier
    assert_eq!(cache.get("k").await.unwrap(), TierOutcome::Ok(Some(b"v".to_vec())));

    let miss = cache.get("missing").await.unwrap();
    assert!(miss.is_degraded());
    assert_eq!(miss.into_value(), None);

    assert!(cache.delete("k").await.is_degraded());
    assert!(!cache.contains("k"));
    assert_eq!(cache.metrics().secondary_failures, 3);
}

#[tokio::test]
async fn test_open_circuit_stops_calling_dead_tier() {
    let tier = Arc::new(InMemoryTier::new());
    tier.set_offline(true);
    let circuit = CircuitConfig {
        failure_threshold: 2,
        success_threshold: 1,
        recovery_timeout: Duration::from_secs(60),
    };
    let cache = cache(10).with_secondary_circuit(tier.clone(), circuit);
    assert_eq!(cache.secondary_circuit(), Some(CircuitState::Closed));

    for i in 0..10 {
        let outcome = cache.get(&format!("missing:{}", i)).await.unwrap();
        assert!(outcome.is_degraded());
    }
    assert_eq!(tier.calls(), 2, "open circuit should fail fast, tier saw {} calls", tier.calls());
    assert_eq!(cache.secondary_circuit(), Some(CircuitState::Open));
    assert_eq!(cache.metrics().secondary_failures, 10);
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_eviction_removes_lowest_scoring_fifth() {
    let cache = cache(10);
    for i in 0..10 {
        cache.set(&format!("k{}", i), b"x", SetOptions::default()).await.unwrap();
    }
    // Touch everything but k3 and k7
    for i in (0..10).filter(|i| *i != 3 && *i != 7) {
        cache.get(&format!("k{}", i)).await.unwrap();
    }

    cache.set("new", b"x", SetOptions::default()).await.unwrap();

    assert_eq!(cache.size(), 9);
    assert!(!cache.contains("k3"));
    assert!(!cache.contains("k7"));
    assert!(cache.contains("new"));
    assert_eq!(cache.metrics().evictions, 2);
}

#[tokio::test(start_paused = true)]
async fn test_sensitive_entries_outlive_hot_routine_ones() {
    let cache = cache(5);
    cache
        .set("vip", b"x", SetOptions::default().sensitivity(SensitivityTag::High))
        .await
        .unwrap();
    for i in 0..4 {
        let key = format!("hot{}", i);
        cache.set(&key, b"x", SetOptions::default()).await.unwrap();
        for _ in 0..50 {
            cache.get(&key).await.unwrap();
        }
    }

    cache.set("extra", b"x", SetOptions::default()).await.unwrap();

    assert!(cache.contains("vip"));
    assert!(cache.size() <= 5);
}

#[tokio::test]
async fn test_size_never_exceeds_capacity() {
    let cache = cache(7);
    for i in 0..100 {
        cache.set(&format!("k{}", i % 23), b"x", SetOptions::default()).await.unwrap();
        assert!(cache.size() <= 7);
    }
}

// =============================================================================
// Integrity
// =============================================================================

#[tokio::test]
async fn test_tampered_payload_detected() {
    let tier = Arc::new(InMemoryTier::new());
    let cache = cache(10).with_secondary(tier.clone());

    let forged = SecondaryRecord {
        payload: b"tampered".to_vec(),
        encrypted: false,
        compressed: false,
        sensitivity: SensitivityTag::Low,
        checksum: access_engine::cache::transform::checksum(b"original"),
        ttl_ms: 60_000,
        created_at_ms: epoch_millis(),
    };
    tier.put("doc", &forged, Duration::from_secs(60)).await.unwrap();

    let err = cache.get_verified("doc").await.unwrap_err();
    assert!(matches!(err, CacheError::Corruption { ref key, .. } if key == "doc"));
}

#[tokio::test]
async fn test_compressed_value_round_trips() {
    let cache = cache(10);
    let value = "lorem ipsum ".repeat(500).into_bytes();
    cache
        .set("doc", &value, SetOptions::default().compressed())
        .await
        .unwrap();

    let metrics = cache.metrics();
    assert!(metrics.bytes < value.len());
    assert_eq!(cache.get_verified("doc").await.unwrap().into_value(), Some(value));
}

#[tokio::test]
async fn test_metrics_break_down_by_sensitivity() {
    let cache = cache(10);
    cache.set("a", b"x", SetOptions::default()).await.unwrap();
    cache
        .set("b", b"x", SetOptions::default().sensitivity(SensitivityTag::High))
        .await
        .unwrap();
    cache
        .set("c", b"x", SetOptions::default().sensitivity(SensitivityTag::High))
        .await
        .unwrap();

    let metrics = cache.metrics();
    assert_eq!(metrics.entry_count, 3);
    assert_eq!(metrics.by_sensitivity[&SensitivityTag::Low], 1);
    assert_eq!(metrics.by_sensitivity[&SensitivityTag::Medium], 0);
    assert_eq!(metrics.by_sensitivity[&SensitivityTag::High], 2);
}
