// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Access Engine
//!
//! A tiered caching and connection-pooling data access engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Query Rewriter                         │
//! │  • Normalizes text, adds optimizer hints                   │
//! │  • Makes implicit joins explicit                           │
//! │  • Derives a SHA-256 cache key for read-only statements    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Tiered Cache                           │
//! │  • Local table, bounded, priority eviction (20% batches)   │
//! │  • Optional secondary tier (Redis) behind a breaker        │
//! │  • zstd compression, AES-256-GCM encryption, checksums     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ miss
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Connection Pools                         │
//! │  • Primary for writes and transactions                     │
//! │  • Read replicas, round-robin                              │
//! │  • FIFO wait queue, idle reaping, bounded size             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use access_engine::{AccessEngine, EngineConfig, Query};
//!
//! let mut engine = AccessEngine::new(EngineConfig::default(), my_connector)?;
//! engine.start().await?;
//!
//! // First call hits the store, the second is served from cache
//! let query = Query::new("SELECT * FROM users WHERE id = ?").bind(42);
//! let rows = engine.execute_query(query.clone()).await?;
//! let again = engine.execute_query(query).await?;
//! assert_eq!(rows, again);
//!
//! println!("{:?}", engine.health().status);
//! engine.shutdown().await;
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`AccessEngine`] orchestrating everything
//! - [`cache`]: [`TieredCache`] and its payload transforms
//! - [`eviction`]: priority scoring for the local tier
//! - [`storage`]: secondary tiers (memory, Redis) and the optional SQL connector
//! - [`pool`]: connection pool and the [`Connector`] seam
//! - [`query`]: query rewriting and [`QueryPlan`]
//! - [`resilience`]: retry and circuit breaking
//! - [`service`]: serde command surface

pub mod config;
pub mod error;
pub mod eviction;
pub mod cache;
pub mod storage;
pub mod pool;
pub mod query;
pub mod resilience;
pub mod coordinator;
pub mod service;
pub mod metrics;

pub use config::{CacheConfig, ConfigError, EngineConfig, EvictionConfig, PoolConfig};
pub use error::{AccessError, AccessFailure, CacheError};
pub use eviction::{PriorityPolicy, SensitivityTag};
pub use cache::{CacheEntry, CacheMetrics, SetOptions, TierOutcome, TieredCache};
pub use storage::{InMemoryTier, RedisTier, SecondaryRecord, SecondaryTier, TierError};
pub use pool::{ConnectionPool, Connector, PoolStats, PooledConnection, QueryOutput, StoreConnection, StoreError};
pub use query::{Hint, KeyOrdering, Priority, Query, QueryPlan, QueryRewriter};
pub use coordinator::{AccessEngine, EngineMetrics, EngineState, HealthReport, HealthStatus};
pub use service::{AccessService, Request, Response};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitState};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;

#[cfg(feature = "sql")]
pub use storage::sql::SqlConnector;
