// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the access engine coordinator.

use serde::Serialize;

use crate::cache::CacheMetrics;
use crate::resilience::circuit_breaker::CircuitState;

/// Engine lifecycle state.
///
/// Use [`super::AccessEngine::state()`] to check current state or
/// [`super::AccessEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Constructed; pools open connections lazily
    Created,
    /// Pools warmed, reapers running
    Running,
    /// Pools closed, no new connections handed out
    ShuttingDown,
}

impl EngineState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Verdict from the number of warning conditions that hold.
    #[must_use]
    pub fn from_warnings(count: usize) -> Self {
        match count {
            0 => Self::Healthy,
            1 => Self::Degraded,
            _ => Self::Unhealthy,
        }
    }

    /// Gauge level (0 = healthy, 1 = degraded, 2 = unhealthy)
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unhealthy => 2,
        }
    }
}

/// Health snapshot returned by [`super::AccessEngine::health()`].
///
/// Pool figures aggregate the primary and every replica pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// `borrowed / max` across all pools
    pub pool_utilization: f64,
    pub cache_hit_rate: f64,
    pub active_connections: usize,
    pub queued_connections: usize,
    pub avg_query_ms: f64,
    pub secondary_failures: u64,
    /// `None` when no secondary tier is attached
    pub secondary_circuit: Option<CircuitState>,
    /// Which conditions fired, for logs and dashboards
    pub warnings: Vec<&'static str>,
}

/// Execution counters since construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineMetrics {
    pub queries: u64,
    pub cache_hits: u64,
    pub retries: u64,
    pub failures: u64,
    pub avg_query_ms: f64,
    pub cache: CacheMetrics,
}
