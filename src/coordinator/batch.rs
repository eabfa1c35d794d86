// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transactional batch execution on the primary pool.

use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};

use crate::error::{AccessError, AccessFailure};
use crate::metrics::LatencyTimer;
use crate::pool::{Connector, PooledConnection, QueryOutput};
use crate::query::QueryPlan;

use super::AccessEngine;

impl<C: Connector> AccessEngine<C> {
    /// Run `plans` in one transaction on one primary connection.
    ///
    /// All-or-nothing: any failing step rolls the transaction back and the
    /// call fails with [`AccessError::TransactionFailure`] naming the step.
    /// Batches are never retried. The connection is returned (or closed, if
    /// the rollback itself failed) exactly once.
    #[tracing::instrument(skip(self, plans), fields(size = plans.len()))]
    pub async fn execute_batch(&self, plans: &[QueryPlan]) -> Result<Vec<QueryOutput>, AccessFailure> {
        let started = Instant::now();
        let _timer = LatencyTimer::new("execute_batch");

        let result = self.run_transaction(plans).await;

        let elapsed = started.elapsed();
        {
            let mut stats = self.stats.lock();
            stats.queries += plans.len() as u64;
            if result.is_err() {
                stats.failures += 1;
            }
        }

        result.map_err(|error| {
            crate::metrics::record_query("batch_error");
            crate::metrics::record_error("execute_batch", error.kind());
            warn!(error = %error, elapsed_ms = elapsed.as_millis() as u64, "Batch failed");
            AccessFailure { error, elapsed, attempts: 1 }
        })
    }

    async fn run_transaction(&self, plans: &[QueryPlan]) -> Result<Vec<QueryOutput>, AccessError> {
        let mut conn = self.primary.acquire().await?;

        if let Err(e) = conn.begin().await {
            conn.invalidate().await;
            return Err(AccessError::Store(e));
        }

        let mut outputs = Vec::with_capacity(plans.len());
        for (step, plan) in plans.iter().enumerate() {
            let limit = plan.timeout.unwrap_or_else(|| self.config.query_timeout());
            let statement_started = Instant::now();
            let executed = timeout(limit, conn.execute(&plan.text, plan.params())).await;
            self.stats.lock().observe(statement_started.elapsed());
            let cause = match executed {
                Ok(Ok(output)) => {
                    outputs.push(output);
                    continue;
                }
                Ok(Err(e)) => AccessError::Store(e),
                Err(_) => AccessError::QueryTimeout { limit },
            };
            Self::abort(conn, step).await;
            return Err(AccessError::TransactionFailure { step, source: Box::new(cause) });
        }

        if let Err(e) = conn.commit().await {
            let step = plans.len();
            Self::abort(conn, step).await;
            return Err(AccessError::TransactionFailure { step, source: Box::new(AccessError::Store(e)) });
        }

        conn.release();
        crate::metrics::record_query("batch_ok");
        debug!(statements = plans.len(), "Batch committed");
        Ok(outputs)
    }

    /// Roll back, then return the connection. A connection whose rollback
    /// failed is in an unknown state and is closed instead.
    async fn abort(mut conn: PooledConnection<C>, step: usize) {
        match conn.rollback().await {
            Ok(()) => {
                debug!(step, "Batch rolled back");
                conn.release();
            }
            Err(e) => {
                error!(step, error = %e, "Rollback failed, closing connection");
                conn.invalidate().await;
            }
        }
    }
}
