// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Data access coordinator.
//!
//! The [`AccessEngine`] ties the components together:
//! - Query rewriter (hints, explicit joins, cache keys)
//! - Tiered cache consulted before any pool interaction
//! - Primary pool for writes and transactions, replica pools for reads
//! - Bounded linear-backoff retry of transient failures
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown
//! ```
//!
//! # Request path
//!
//! ```text
//! execute(plan)
//!   │
//!   ├─ cache_key? ──► TieredCache::get ── hit ──► return (no pool interaction)
//!   │
//!   └─ retry_when(is_transient, linear backoff)
//!        │
//!        ├─ route: read_only → replica (round-robin) | otherwise → primary
//!        ├─ acquire (FIFO wait, connection_timeout)
//!        ├─ execute raced against query timeout
//!        └─ success → release, cache if read-only | failure → invalidate
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use access_engine::{AccessEngine, EngineConfig, Query};
//!
//! let mut engine = AccessEngine::new(EngineConfig::default(), connector);
//! engine.start().await?;
//!
//! let rows = engine
//!     .execute_query(Query::new("SELECT * FROM users WHERE id = ?").bind(42))
//!     .await?;
//! ```

mod batch;
mod health;
mod lifecycle;
mod types;

pub use types::{EngineMetrics, EngineState, HealthReport, HealthStatus};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::cache::{SetOptions, TieredCache};
use crate::config::{ConfigError, EngineConfig};
use crate::error::{AccessError, AccessFailure};
use crate::metrics::LatencyTimer;
use crate::pool::{ConnectionPool, Connector, QueryOutput};
use crate::query::{Query, QueryPlan, QueryRewriter};
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::{retry_when, RetryConfig};
use crate::storage::SecondaryTier;

#[derive(Default)]
pub(super) struct ExecStats {
    pub(super) queries: u64,
    pub(super) cache_hits: u64,
    pub(super) retries: u64,
    pub(super) failures: u64,
    pub(super) avg_query_ms: Option<f64>,
}

impl ExecStats {
    /// Fold in one statement's run time on its connection. Pool waits and
    /// retry backoff are not part of it.
    fn observe(&mut self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1_000.0;
        self.avg_query_ms = Some(match self.avg_query_ms {
            Some(avg) => avg * 0.9 + sample * 0.1,
            None => sample,
        });
    }
}

/// Main data access orchestrator.
///
/// Explicitly constructed and passed by reference (or `Arc`) to whatever
/// needs it; there is no process-wide instance.
///
/// # Thread Safety
///
/// `execute`, `execute_batch`, `health` and `metrics` take `&self` and are
/// safe under arbitrary interleaving from many tasks.
pub struct AccessEngine<C: Connector> {
    pub(super) config: EngineConfig,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Writes and transactions
    pub(super) primary: Arc<ConnectionPool<C>>,

    /// Read-only plans round-robin across these when present
    pub(super) replicas: Vec<Arc<ConnectionPool<C>>>,
    pub(super) next_replica: AtomicUsize,

    pub(super) cache: TieredCache,
    pub(super) rewriter: QueryRewriter,

    pub(super) stats: Mutex<ExecStats>,
    pub(super) reapers: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Connector> AccessEngine<C> {
    /// Create an engine over a primary connector. Fails only on invalid config.
    pub fn new(config: EngineConfig, primary: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = TieredCache::new(&config.cache, &config.eviction)?;
        let (state, state_rx) = watch::channel(EngineState::Created);

        Ok(Self {
            primary: ConnectionPool::new("primary", primary, config.pool.clone()),
            replicas: Vec::new(),
            next_replica: AtomicUsize::new(0),
            cache,
            rewriter: QueryRewriter::new(),
            stats: Mutex::new(ExecStats::default()),
            reapers: Mutex::new(Vec::new()),
            state,
            state_rx,
            config,
        })
    }

    /// Add read-replica pools, one per connector, sized like the primary.
    #[must_use]
    pub fn with_replicas(mut self, connectors: Vec<C>) -> Self {
        let offset = self.replicas.len();
        for (i, connector) in connectors.into_iter().enumerate() {
            let name = format!("replica_{}", offset + i);
            self.replicas.push(ConnectionPool::new(name, connector, self.config.pool.clone()));
        }
        self
    }

    /// Attach a secondary cache tier instead of connecting to `secondary_url`.
    #[must_use]
    pub fn with_secondary(mut self, tier: Arc<dyn SecondaryTier>) -> Self {
        self.cache.attach_secondary(tier, CircuitConfig::secondary_tier());
        self
    }

    #[must_use]
    pub fn with_rewriter(mut self, rewriter: QueryRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    #[must_use]
    pub fn rewriter(&self) -> &QueryRewriter {
        &self.rewriter
    }

    #[must_use]
    pub fn primary(&self) -> &Arc<ConnectionPool<C>> {
        &self.primary
    }

    #[must_use]
    pub fn replicas(&self) -> &[Arc<ConnectionPool<C>>] {
        &self.replicas
    }

    /// Rewrite and execute in one step.
    pub async fn execute_query(&self, query: Query) -> Result<QueryOutput, AccessFailure> {
        let plan = self.rewriter.rewrite(query);
        self.execute(&plan).await
    }

    /// Execute a plan: cache first (when keyed), then the store with retry.
    ///
    /// After exhausting retries the last error is returned verbatim inside
    /// an [`AccessFailure`] with the elapsed time and attempt count.
    #[tracing::instrument(skip(self, plan), fields(priority = plan.priority.as_str(), read_only = plan.read_only, source))]
    pub async fn execute(&self, plan: &QueryPlan) -> Result<QueryOutput, AccessFailure> {
        let started = Instant::now();
        let _timer = LatencyTimer::new("execute");

        if let Some(key) = plan.cache_key.as_deref() {
            if let Some(output) = self.cached(key).await {
                tracing::Span::current().record("source", "cache");
                let mut stats = self.stats.lock();
                stats.queries += 1;
                stats.cache_hits += 1;
                crate::metrics::record_query("cache_hit");
                return Ok(output);
            }
        }
        tracing::Span::current().record("source", "store");

        let retry_config = RetryConfig::linear(self.config.retry_delay(), self.config.retry_attempts);
        let attempted = retry_when("execute", &retry_config, AccessError::is_transient, || self.attempt(plan)).await;

        let retries = u64::from(attempted.attempts.saturating_sub(1));
        for _ in 0..retries {
            crate::metrics::record_retry("execute");
        }

        let elapsed = started.elapsed();
        {
            let mut stats = self.stats.lock();
            stats.queries += 1;
            stats.retries += retries;
            if attempted.result.is_err() {
                stats.failures += 1;
            }
        }

        match attempted.result {
            Ok(output) => {
                crate::metrics::record_query("ok");
                if plan.read_only {
                    if let Some(key) = plan.cache_key.as_deref() {
                        self.store_result(key, plan, &output).await;
                    }
                }
                Ok(output)
            }
            Err(error) => {
                crate::metrics::record_query("error");
                crate::metrics::record_error("execute", error.kind());
                warn!(
                    error = %error,
                    attempts = attempted.attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Query failed"
                );
                Err(AccessFailure { error, elapsed, attempts: attempted.attempts })
            }
        }
    }

    /// One attempt on a freshly acquired connection.
    async fn attempt(&self, plan: &QueryPlan) -> Result<QueryOutput, AccessError> {
        let pool = self.route(plan);
        let mut conn = pool.acquire().await?;
        let limit = plan.timeout.unwrap_or_else(|| self.config.query_timeout());

        let statement_started = Instant::now();
        let result = timeout(limit, conn.execute(&plan.text, plan.params())).await;
        self.stats.lock().observe(statement_started.elapsed());
        match result {
            Ok(Ok(output)) => {
                conn.release();
                Ok(output)
            }
            Ok(Err(e)) => {
                conn.invalidate().await;
                Err(AccessError::Store(e))
            }
            Err(_) => {
                // The abandoned statement may still be running on that connection
                conn.invalidate().await;
                Err(AccessError::QueryTimeout { limit })
            }
        }
    }

    fn route(&self, plan: &QueryPlan) -> &Arc<ConnectionPool<C>> {
        if plan.read_only && !self.replicas.is_empty() {
            let idx = self.next_replica.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
            return &self.replicas[idx];
        }
        &self.primary
    }

    /// Cached result for `key`. Unreadable entries count as misses.
    async fn cached(&self, key: &str) -> Option<QueryOutput> {
        let bytes = match self.cache.get(key).await {
            Ok(outcome) => outcome.into_value()?,
            Err(e) => {
                warn!(key, error = %e, "Cached result unreadable, going to the store");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(key, error = %e, "Cached result is not a query output");
                None
            }
        }
    }

    async fn store_result(&self, key: &str, plan: &QueryPlan, output: &QueryOutput) {
        let bytes = match serde_json::to_vec(output) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode query result for caching");
                return;
            }
        };
        let options = SetOptions {
            ttl: plan.ttl,
            sensitivity: plan.sensitivity,
            ..SetOptions::default()
        };
        match self.cache.set(key, &bytes, options).await {
            Ok(()) => debug!(key, "Query result cached"),
            Err(e) => warn!(key, error = %e, "Failed to cache query result"),
        }
    }
}
