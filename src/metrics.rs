// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the access engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.).
//!
//! # Metric Naming Convention
//! - `access_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: local, secondary
//! - `pool`: primary, replica-N
//! - `status`: success, error, hit, miss

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::eviction::SensitivityTag;

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache lookup outcome at a tier
pub fn record_cache_lookup(tier: &str, status: &str) {
    counter!(
        "access_engine_cache_lookups_total",
        "tier" => tier.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a cache write
pub fn record_cache_write(sensitivity: SensitivityTag) {
    counter!(
        "access_engine_cache_writes_total",
        "sensitivity" => sensitivity.as_str()
    )
    .increment(1);
}

/// Set current local cache item count
pub fn set_cache_entries(count: usize) {
    gauge!("access_engine_cache_entries").set(count as f64);
}

/// Record eviction event
pub fn record_eviction(count: usize) {
    counter!("access_engine_evictions_total").increment(count as u64);
}

/// Record entries found expired on read
pub fn record_expiration(tier: &str) {
    counter!(
        "access_engine_expirations_total",
        "tier" => tier.to_string()
    )
    .increment(1);
}

/// Record a secondary-tier failure absorbed by the cache
pub fn record_secondary_failure(operation: &str) {
    counter!(
        "access_engine_secondary_failures_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record data corruption detection
pub fn record_corruption(key: &str) {
    counter!(
        "access_engine_corruption_detected_total",
        "key" => key.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "access_engine_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// POOL
// ═══════════════════════════════════════════════════════════════════════════

/// Publish pool occupancy
pub fn set_pool_connections(pool: &str, borrowed: usize, idle: usize, waiting: usize) {
    gauge!("access_engine_pool_borrowed", "pool" => pool.to_string()).set(borrowed as f64);
    gauge!("access_engine_pool_idle", "pool" => pool.to_string()).set(idle as f64);
    gauge!("access_engine_pool_waiting", "pool" => pool.to_string()).set(waiting as f64);
}

/// Record time spent waiting for a connection
pub fn record_acquire_wait(pool: &str, duration: Duration) {
    histogram!(
        "access_engine_pool_acquire_seconds",
        "pool" => pool.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a connection lifecycle event (created, reaped, invalidated, closed)
pub fn record_connection_event(pool: &str, event: &str) {
    counter!(
        "access_engine_pool_connections_total",
        "pool" => pool.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// EXECUTION
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished query execution
pub fn record_query(status: &str) {
    counter!(
        "access_engine_queries_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a retry of a transient failure
pub fn record_retry(kind: &str) {
    counter!(
        "access_engine_retries_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an error with category for alerting
pub fn record_error(operation: &str, kind: &str) {
    counter!(
        "access_engine_errors_total",
        "operation" => operation.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "access_engine_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set engine state (for monitoring lifecycle transitions)
pub fn set_engine_state(state: &str) {
    gauge!(
        "access_engine_state",
        "state" => state.to_string()
    )
    .set(1.0);
}

/// Set health status (0 = healthy, 1 = degraded, 2 = unhealthy)
pub fn set_health_status(level: u8) {
    gauge!("access_engine_health_status").set(f64::from(level));
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
