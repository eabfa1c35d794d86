// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Health and metrics snapshots.
//!
//! Status is derived from four warning conditions:
//!
//! | Condition | Threshold |
//! |---|---|
//! | pool utilization | > 80% |
//! | queued acquires | > 5 |
//! | average query time | > 500ms |
//! | cache hit rate | < 0.7 (once anything was looked up) |
//!
//! None hold: healthy. Exactly one: degraded. Two or more: unhealthy.
//! An open secondary-tier circuit is reported but does not change the status,
//! since the local tier keeps serving.

use tracing::debug;

use crate::pool::Connector;

use super::{AccessEngine, EngineMetrics, HealthReport, HealthStatus};

const MAX_UTILIZATION: f64 = 0.8;
const MAX_QUEUED: usize = 5;
const MAX_AVG_QUERY_MS: f64 = 500.0;
const MIN_HIT_RATE: f64 = 0.7;

impl<C: Connector> AccessEngine<C> {
    /// Cheap, I/O-free health snapshot.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let (mut borrowed, mut waiting, mut max) = (0usize, 0usize, 0usize);
        for pool in std::iter::once(&self.primary).chain(&self.replicas) {
            let stats = pool.stats();
            borrowed += stats.borrowed;
            waiting += stats.waiting;
            max += stats.max;
        }
        let pool_utilization = if max == 0 { 0.0 } else { borrowed as f64 / max as f64 };

        let cache = self.cache.metrics();
        let avg_query_ms = self.stats.lock().avg_query_ms.unwrap_or(0.0);

        let mut warnings = Vec::new();
        if pool_utilization > MAX_UTILIZATION {
            warnings.push("pool_utilization");
        }
        if waiting > MAX_QUEUED {
            warnings.push("queued_connections");
        }
        if avg_query_ms > MAX_AVG_QUERY_MS {
            warnings.push("avg_query_time");
        }
        if cache.hits + cache.misses > 0 && cache.hit_rate < MIN_HIT_RATE {
            warnings.push("cache_hit_rate");
        }

        let status = HealthStatus::from_warnings(warnings.len());
        crate::metrics::set_health_status(status.level());
        if status != HealthStatus::Healthy {
            debug!(?status, ?warnings, "Health check raised warnings");
        }

        HealthReport {
            status,
            pool_utilization,
            cache_hit_rate: cache.hit_rate,
            active_connections: borrowed,
            queued_connections: waiting,
            avg_query_ms,
            secondary_failures: cache.secondary_failures,
            secondary_circuit: self.cache.secondary_circuit(),
            warnings,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> EngineMetrics {
        let cache = self.cache.metrics();
        let stats = self.stats.lock();
        EngineMetrics {
            queries: stats.queries,
            cache_hits: stats.cache_hits,
            retries: stats.retries,
            failures: stats.failures,
            avg_query_ms: stats.avg_query_ms.unwrap_or(0.0),
            cache,
        }
    }
}
