// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consecutive-failure circuit breaker for the secondary cache tier.
//!
//! The cache treats its secondary tier as optional. Once the tier has failed
//! `failure_threshold` times in a row the circuit opens and every call fails
//! immediately with [`CircuitError::Open`], so reads and writes fall back to the
//! local tier without waiting on a dead network hop. After `recovery_timeout`
//! the next call is let through in the half-open state; `success_threshold`
//! successes close the circuit again, a single failure reopens it.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit is open; the operation was not attempted
    #[error("circuit '{0}' open, call not attempted")]
    Open(String),

    /// The operation ran and failed
    #[error("{0}")]
    Failed(#[source] E),
}

/// Where a breaker currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Successes in half-open needed to close it again
    pub success_threshold: u32,
    /// Time an open circuit waits before letting a trial call through
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::secondary_tier()
    }
}

impl CircuitConfig {
    /// Opens after five consecutive tier failures and retries after 15s.
    #[must_use]
    pub fn secondary_tier() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker wrapping calls to one downstream dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    breaker: Mutex<Breaker>,
    calls: AtomicU64,
    rejections: AtomicU64,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            breaker: Mutex::new(Breaker {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
            calls: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            trips: AtomicU64::new(0),
        }
    }

    /// Run `f` unless the circuit is open.
    ///
    /// A call dropped before it finishes records neither success nor failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_circuit_call(&self.name, "rejected");
            debug!(circuit = %self.name, "Circuit open, call rejected");
            return Err(CircuitError::Open(self.name.clone()));
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
        match f().await {
            Ok(value) => {
                self.record_success();
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                crate::metrics::record_circuit_call(&self.name, "failure");
                Err(CircuitError::Failed(e))
            }
        }
    }

    fn admit(&self) -> bool {
        let mut breaker = self.breaker.lock();
        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let waited = breaker.opened_at.map_or(true, |at| at.elapsed() >= self.config.recovery_timeout);
                if waited {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.half_open_successes = 0;
                    info!(circuit = %self.name, "Circuit half-open, trying downstream again");
                }
                waited
            }
        }
    }

    fn record_success(&self) {
        let mut breaker = self.breaker.lock();
        breaker.consecutive_failures = 0;
        if breaker.state == CircuitState::HalfOpen {
            breaker.half_open_successes += 1;
            if breaker.half_open_successes >= self.config.success_threshold {
                breaker.state = CircuitState::Closed;
                breaker.half_open_successes = 0;
                breaker.opened_at = None;
                info!(circuit = %self.name, "Circuit closed");
            }
        }
    }

    fn record_failure(&self) {
        let mut breaker = self.breaker.lock();
        breaker.half_open_successes = 0;
        let trip = match breaker.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => {
                breaker.consecutive_failures += 1;
                breaker.consecutive_failures >= self.config.failure_threshold
            }
            // A call admitted before another task opened the circuit
            CircuitState::Open => false,
        };
        if trip {
            breaker.state = CircuitState::Open;
            breaker.opened_at = Some(Instant::now());
            breaker.consecutive_failures = 0;
            self.trips.fetch_add(1, Ordering::Relaxed);
            warn!(
                circuit = %self.name,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last recorded state. An open circuit past its recovery timeout still
    /// reads `Open` until the next call is admitted.
    pub fn state(&self) -> CircuitState {
        self.breaker.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Calls that reached the downstream
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Calls failed fast while open
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Times the circuit has opened
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitConfig {
                failure_threshold: failures,
                success_threshold: successes,
                recovery_timeout: Duration::from_millis(100),
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        cb.call(|| async { Err::<(), _>("down") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        cb.call(|| async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, 1);

        for _ in 0..2 {
            assert!(matches!(fail(&cb).await, Err(CircuitError::Failed("down"))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(fail(&cb).await.is_err());
        assert!(cb.is_open());
        assert_eq!(cb.trips(), 1);

        let mut attempted = false;
        let rejected = cb
            .call(|| {
                attempted = true;
                async { Ok::<(), &'static str>(()) }
            })
            .await;
        assert!(matches!(rejected, Err(CircuitError::Open(ref name)) if name == "test"));
        assert!(!attempted);
        assert_eq!(cb.rejections(), 1);
        assert_eq!(cb.calls(), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_run() {
        let cb = breaker(3, 1);

        fail(&cb).await.ok();
        fail(&cb).await.ok();
        succeed(&cb).await.unwrap();
        fail(&cb).await.ok();
        fail(&cb).await.ok();

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_through_half_open() {
        let cb = breaker(1, 2);
        fail(&cb).await.ok();
        assert!(cb.is_open());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open(_))));

        tokio::time::advance(Duration::from_millis(60)).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, 1);
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert!(cb.is_open());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(matches!(fail(&cb).await, Err(CircuitError::Failed(_))));
        assert!(cb.is_open());
        assert_eq!(cb.trips(), 2);

        // The recovery window restarts from the reopen
        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open(_))));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
        assert_eq!(serde_json::to_string(&CircuitState::Open).unwrap(), "\"open\"");
    }
}
