// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process command surface.
//!
//! A thin, serde-friendly layer over [`AccessEngine`] for callers that talk
//! to the engine across a local RPC boundary. Requests are tagged by `op`:
//!
//! ```text
//! {"op": "SET", "key": "user:1", "value": {"name": "ada"}, "ttl_ms": 60000}
//! {"op": "GET", "key": "user:1"}
//! {"op": "EXECUTE", "query": "SELECT * FROM users WHERE id = ?", "params": [1]}
//! {"op": "HEALTH"}
//! ```
//!
//! Handlers never panic; every failure becomes [`Response::Error`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheMetrics, SetOptions, TierOutcome};
use crate::coordinator::{AccessEngine, HealthReport};
use crate::error::{AccessFailure, CacheError};
use crate::eviction::SensitivityTag;
use crate::pool::{Connector, QueryOutput};
use crate::query::{Query, QueryPlan};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    Get {
        key: String,
    },
    Set {
        key: String,
        value: Value,
        #[serde(default)]
        ttl_ms: Option<u64>,
        #[serde(default)]
        sensitivity: SensitivityTag,
        #[serde(default)]
        encrypt: bool,
        #[serde(default)]
        compress: bool,
    },
    Delete {
        key: String,
    },
    Clear {
        #[serde(default)]
        pattern: Option<String>,
    },
    Metrics,
    Execute {
        query: String,
        #[serde(default)]
        params: Vec<Value>,
        /// `false` forces primary routing and skips caching; `true` cannot
        /// promote a statement that isn't read-only
        #[serde(default)]
        read_only: Option<bool>,
        #[serde(default)]
        ttl_ms: Option<u64>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    ExecuteBatch {
        queries: Vec<Query>,
    },
    Health,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Value {
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        degraded: Option<String>,
    },
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        degraded: Option<String>,
    },
    Cleared {
        removed: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        degraded: Option<String>,
    },
    Metrics(CacheMetrics),
    Rows(QueryOutput),
    Batch {
        results: Vec<QueryOutput>,
    },
    Health(HealthReport),
    Error {
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
}

impl Response {
    fn from_failure(failure: &AccessFailure) -> Self {
        Self::Error {
            kind: failure.kind().to_string(),
            message: failure.error.to_string(),
            elapsed_ms: Some(failure.elapsed.as_millis() as u64),
        }
    }

    fn from_cache_error(error: &CacheError) -> Self {
        Self::Error {
            kind: "cache".to_string(),
            message: error.to_string(),
            elapsed_ms: None,
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Error {
            kind: "invalid_request".to_string(),
            message: message.into(),
            elapsed_ms: None,
        }
    }
}

fn degraded_reason<T>(outcome: &TierOutcome<T>) -> Option<String> {
    match outcome {
        TierOutcome::Ok(_) => None,
        TierOutcome::Degraded { reason, .. } => Some(reason.clone()),
    }
}

/// Command dispatcher over a shared engine.
pub struct AccessService<C: Connector> {
    engine: Arc<AccessEngine<C>>,
}

impl<C: Connector> Clone for AccessService<C> {
    fn clone(&self) -> Self {
        Self { engine: Arc::clone(&self.engine) }
    }
}

impl<C: Connector> AccessService<C> {
    pub fn new(engine: Arc<AccessEngine<C>>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<AccessEngine<C>> {
        &self.engine
    }

    /// Parse a JSON request, handle it and serialize the response.
    pub async fn handle_json(&self, raw: &str) -> String {
        let response = match serde_json::from_str::<Request>(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => Response::invalid(e.to_string()),
        };
        serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"result":"error","kind":"codec","message":"{}"}}"#, e))
    }

    pub async fn handle(&self, request: Request) -> Response {
        let cache = self.engine.cache();
        match request {
            Request::Get { key } => match cache.get(&key).await {
                Ok(outcome) => {
                    let degraded = degraded_reason(&outcome);
                    let value = outcome.into_value().map(|bytes| {
                        serde_json::from_slice(&bytes)
                            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
                    });
                    Response::Value { value, degraded }
                }
                Err(e) => Response::from_cache_error(&e),
            },

            Request::Set { key, value, ttl_ms, sensitivity, encrypt, compress } => {
                let bytes = match serde_json::to_vec(&value) {
                    Ok(bytes) => bytes,
                    Err(e) => return Response::invalid(e.to_string()),
                };
                let options = SetOptions {
                    ttl: ttl_ms.map(Duration::from_millis),
                    sensitivity,
                    encrypt,
                    compress,
                };
                match cache.set(&key, &bytes, options).await {
                    Ok(()) => Response::Ok { degraded: None },
                    Err(e) => Response::from_cache_error(&e),
                }
            }

            Request::Delete { key } => {
                let outcome = cache.delete(&key).await;
                Response::Ok { degraded: degraded_reason(&outcome) }
            }

            Request::Clear { pattern } => match cache.clear(pattern.as_deref()).await {
                Ok(outcome) => {
                    let degraded = degraded_reason(&outcome);
                    Response::Cleared { removed: outcome.into_value(), degraded }
                }
                Err(e) => Response::from_cache_error(&e),
            },

            Request::Metrics => Response::Metrics(cache.metrics()),

            Request::Execute { query, params, read_only, ttl_ms, timeout_ms } => {
                let plan = self.plan(Query { text: query, params }, read_only, ttl_ms, timeout_ms);
                debug!(read_only = plan.read_only, "Service execute");
                match self.engine.execute(&plan).await {
                    Ok(output) => Response::Rows(output),
                    Err(failure) => Response::from_failure(&failure),
                }
            }

            Request::ExecuteBatch { queries } => {
                let plans: Vec<QueryPlan> = queries
                    .into_iter()
                    .map(|q| self.engine.rewriter().rewrite(q).as_write())
                    .collect();
                match self.engine.execute_batch(&plans).await {
                    Ok(results) => Response::Batch { results },
                    Err(failure) => Response::from_failure(&failure),
                }
            }

            Request::Health => Response::Health(self.engine.health()),
        }
    }

    fn plan(&self, query: Query, read_only: Option<bool>, ttl_ms: Option<u64>, timeout_ms: Option<u64>) -> QueryPlan {
        let mut plan = self.engine.rewriter().rewrite(query);
        if read_only == Some(false) {
            plan = plan.as_write();
        }
        if let Some(ttl) = ttl_ms {
            plan = plan.with_ttl(Duration::from_millis(ttl));
        }
        if let Some(limit) = timeout_ms {
            plan = plan.with_timeout(Duration::from_millis(limit));
        }
        plan
    }
}
