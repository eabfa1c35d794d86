// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with linear or exponential backoff.
//!
//! Provides configurable retry behavior for transient failures.
//! Different presets are available for different use cases.
//!
//! # Example
//!
//! ```
//! use access_engine::resilience::retry::{Backoff, RetryConfig};
//! use std::time::Duration;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//!
//! // Query path: linear backoff, 3 retries after the first attempt
//! let query = RetryConfig::linear(Duration::from_millis(100), 3);
//! assert_eq!(query.max_attempts, 4);
//! assert_eq!(query.delay_for(0), Duration::from_millis(100));
//! assert_eq!(query.delay_for(2), Duration::from_millis(300));
//! assert!(matches!(query.backoff, Backoff::Linear));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `initial_delay * (failed_attempt + 1)`
    Linear,
    /// `initial_delay * factor^failed_attempt`, capped at `max_delay`
    Exponential { factor: f64, max_delay: Duration },
}

/// Configuration for connection/operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail for initial connections
/// - [`RetryConfig::linear()`] - The query path (`retry_attempts` / `retry_delay_ms`)
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub backoff: Backoff,
    /// Total attempts including the first one (always >= 1)
    pub max_attempts: u32,
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Attempts 5 times with exponential backoff, failing after ~3 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            backoff: Backoff::Exponential {
                factor: 2.0,
                max_delay: Duration::from_secs(2),
            },
        }
    }

    /// Linear backoff with `retries` retries after the first attempt.
    #[must_use]
    pub fn linear(delay: Duration, retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            initial_delay: delay,
            backoff: Backoff::Linear,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff: Backoff::Exponential {
                factor: 2.0,
                max_delay: Duration::from_millis(10),
            },
        }
    }

    /// Delay to sleep after the failed attempt with 0-based index `failed_attempt`.
    #[must_use]
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.initial_delay.saturating_mul(failed_attempt.saturating_add(1)),
            Backoff::Exponential { factor, max_delay } => {
                let scaled = self.initial_delay.as_secs_f64() * factor.powi(failed_attempt as i32);
                if !scaled.is_finite() || scaled >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

/// Result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Retry every failure up to `max_attempts`.
pub async fn retry<F, Fut, T, E>(operation_name: &str, config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(operation_name, config, |_| true, operation).await.result
}

/// Retry failures for which `should_retry` holds, up to `max_attempts`.
///
/// The final error is returned verbatim. Non-retryable errors return
/// immediately without sleeping.
pub async fn retry_when<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 0 {
                    info!(operation = operation_name, retries = attempt, "Operation succeeded after retry");
                }
                return Attempted { result: Ok(val), attempts: attempt + 1 };
            }
            Err(err) => {
                let attempts = attempt + 1;
                if attempts >= max_attempts || !should_retry(&err) {
                    return Attempted { result: Err(err), attempts };
                }

                let delay = config.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
