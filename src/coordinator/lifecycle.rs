// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: start and shutdown.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AccessError;
use crate::pool::Connector;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::storage::RedisTier;

use super::{AccessEngine, EngineState};

impl<C: Connector> AccessEngine<C> {
    /// Start the engine.
    ///
    /// 1. Validate config
    /// 2. Connect the Redis secondary tier when `secondary_url` is set and
    ///    no tier was injected (failure leaves the cache local-only)
    /// 3. Warm every pool to `min_connections`
    /// 4. Spawn idle reapers
    #[tracing::instrument(skip(self), fields(replicas = self.replicas.len()))]
    pub async fn start(&mut self) -> Result<(), AccessError> {
        let started = tokio::time::Instant::now();
        info!("Starting access engine...");
        self.config.validate()?;

        if !self.cache.has_secondary() {
            if let Some(url) = self.config.cache.secondary_url.clone() {
                let prefix = self.config.cache.secondary_prefix.clone();
                match RedisTier::with_prefix(&url, prefix.as_deref()).await {
                    Ok(tier) => {
                        info!(url = %url, "Secondary cache tier connected");
                        self.cache.attach_secondary(Arc::new(tier), CircuitConfig::secondary_tier());
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "Secondary cache tier unreachable, running local-only");
                        self.cache.note_secondary_failure("connect");
                    }
                }
            }
        }

        let mut warmed = self.primary.warm_up().await?;
        for replica in &self.replicas {
            warmed += replica.warm_up().await?;
        }

        if let Some(interval) = self.config.pool.reap_interval() {
            let mut reapers = self.reapers.lock();
            reapers.push(self.primary.spawn_reaper(interval));
            for replica in &self.replicas {
                reapers.push(replica.spawn_reaper(interval));
            }
        }

        let _ = self.state.send(EngineState::Running);
        crate::metrics::set_engine_state(EngineState::Running.as_str());
        crate::metrics::record_latency("start", started.elapsed());
        info!(
            warmed,
            has_secondary = self.cache.has_secondary(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Access engine running"
        );
        Ok(())
    }

    /// Stop reapers, close every pool and wait for in-flight cache mirrors.
    ///
    /// Cache reads keep working; store access fails with `PoolClosed`.
    pub async fn shutdown(&self) {
        info!("Initiating access engine shutdown...");
        let _ = self.state.send(EngineState::ShuttingDown);
        crate::metrics::set_engine_state(EngineState::ShuttingDown.as_str());

        for reaper in self.reapers.lock().drain(..) {
            reaper.abort();
        }

        self.primary.close().await;
        for replica in &self.replicas {
            replica.close().await;
        }
        self.cache.flush_mirrors().await;

        info!("Access engine shutdown complete");
    }
}
