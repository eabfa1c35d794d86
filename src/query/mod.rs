// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query rewriting and plan construction.
//!
//! [`QueryRewriter::rewrite`] is pure: it normalizes the text, makes implicit
//! joins explicit, prepends optimizer hints, and derives a deterministic cache
//! key for read-only statements.
//!
//! # Example
//!
//! ```
//! use access_engine::query::{Query, QueryRewriter};
//!
//! let plan = QueryRewriter::new().rewrite(
//!     Query::new("SELECT * FROM users u, orders o WHERE u.id = o.user_id AND u.id = ?").bind(7),
//! );
//! assert!(plan.read_only);
//! assert!(plan.cache_key.is_some());
//! assert_eq!(
//!     plan.text,
//!     "/*+ INDEX_LOOKUP */ SELECT * FROM users u JOIN orders o ON u.id = o.user_id WHERE u.id = ?"
//! );
//! ```

pub mod hints;

pub use hints::Hint;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::eviction::SensitivityTag;

/// Statement text plus positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Scheduling tag carried by a plan (recorded in spans and logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// How parameters enter the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyOrdering {
    /// Call order is significant: `(1, 2)` and `(2, 1)` hash differently
    #[default]
    CallOrder,
    /// Parameters are sorted by their JSON encoding before hashing
    Canonical,
}

/// Immutable description of one statement execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub original: Query,
    /// Normalized, rewritten text sent to the store
    pub text: String,
    pub hints: Vec<Hint>,
    /// Set only for read-only plans that may be served from cache
    pub cache_key: Option<String>,
    pub read_only: bool,
    pub priority: Priority,
    /// Overrides `query_timeout` for this plan
    pub timeout: Option<Duration>,
    /// Overrides the cache's default TTL for this plan's result
    pub ttl: Option<Duration>,
    pub sensitivity: SensitivityTag,
}

impl QueryPlan {
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.original.params
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_sensitivity(mut self, sensitivity: SensitivityTag) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Always go to the store and never cache the result.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache_key = None;
        self
    }

    /// Treat as a write: primary pool, no caching.
    #[must_use]
    pub fn as_write(mut self) -> Self {
        self.read_only = false;
        self.cache_key = None;
        self
    }
}

/// Stateless statement rewriter.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRewriter {
    ordering: KeyOrdering,
}

impl QueryRewriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ordering(ordering: KeyOrdering) -> Self {
        Self { ordering }
    }

    pub fn rewrite(&self, query: Query) -> QueryPlan {
        let normalized = hints::normalize(&query.text);
        let read_only = hints::is_read_only(&normalized);
        let body = hints::explicit_joins(&normalized).unwrap_or_else(|| normalized.clone());
        let found = hints::detect(&body);

        let text = if found.is_empty() {
            body
        } else {
            let prefix: Vec<&str> = found.iter().map(|h| h.as_comment()).collect();
            format!("{} {}", prefix.join(" "), body)
        };

        let cache_key = read_only.then(|| self.cache_key(&normalized, &query.params));

        QueryPlan {
            original: query,
            text,
            hints: found,
            cache_key,
            read_only,
            priority: Priority::default(),
            timeout: None,
            ttl: None,
            sensitivity: SensitivityTag::default(),
        }
    }

    /// `query:` + hex SHA-256 over normalized text and JSON-encoded params.
    #[must_use]
    pub fn cache_key(&self, normalized: &str, params: &[Value]) -> String {
        let mut encoded: Vec<String> = params.iter().map(Value::to_string).collect();
        if self.ordering == KeyOrdering::Canonical {
            encoded.sort();
        }

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        for param in &encoded {
            // Unit separator keeps ("ab", "c") apart from ("a", "bc")
            hasher.update([0x1f]);
            hasher.update(param.as_bytes());
        }
        format!("query:{}", hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_deterministic() {
        let rewriter = QueryRewriter::new();
        let a = rewriter.rewrite(Query::new("SELECT * FROM users WHERE id = ?").bind(1));
        let b = rewriter.rewrite(Query::new("SELECT *   FROM users\nWHERE id = ?;").bind(1));
        assert_eq!(a.cache_key, b.cache_key);
        assert!(a.cache_key.unwrap().starts_with("query:"));
    }

    #[test]
    fn test_param_order_matters_by_default() {
        let rewriter = QueryRewriter::new();
        let sql = "SELECT * FROM t WHERE a = ? AND b = ?";
        let ab = rewriter.rewrite(Query::new(sql).bind(1).bind(2));
        let ba = rewriter.rewrite(Query::new(sql).bind(2).bind(1));
        assert_ne!(ab.cache_key, ba.cache_key);
    }

    #[test]
    fn test_canonical_ordering_collapses_permutations() {
        let rewriter = QueryRewriter::with_ordering(KeyOrdering::Canonical);
        let sql = "SELECT * FROM t WHERE a IN (?, ?)";
        let ab = rewriter.rewrite(Query::new(sql).bind("x").bind("y"));
        let ba = rewriter.rewrite(Query::new(sql).bind("y").bind("x"));
        assert_eq!(ab.cache_key, ba.cache_key);
    }

    #[test]
    fn test_param_boundaries_are_distinct() {
        let rewriter = QueryRewriter::new();
        let sql = "SELECT ? || ?";
        let a = rewriter.rewrite(Query::new(sql).bind("ab").bind("c"));
        let b = rewriter.rewrite(Query::new(sql).bind("a").bind("bc"));
        assert_ne!(a.cache_key, b.cache_key);
    }

    #[test]
    fn test_writes_get_no_cache_key() {
        let plan = QueryRewriter::new().rewrite(Query::new("UPDATE users SET name = ? WHERE id = ?").bind("a").bind(1));
        assert!(!plan.read_only);
        assert!(plan.cache_key.is_none());
        assert_eq!(plan.hints, vec![Hint::IndexLookup]);
        assert_eq!(plan.text, "/*+ INDEX_LOOKUP */ UPDATE users SET name = ? WHERE id = ?");
    }

    #[test]
    fn test_unrecognized_query_is_unmodified() {
        let plan = QueryRewriter::new().rewrite(Query::new("SELECT name FROM users"));
        assert_eq!(plan.text, "SELECT name FROM users");
        assert!(plan.hints.is_empty());
    }

    #[test]
    fn test_builders() {
        let plan = QueryRewriter::new()
            .rewrite(Query::new("SELECT 1"))
            .with_priority(Priority::High)
            .with_timeout(Duration::from_millis(250))
            .with_ttl(Duration::from_secs(5))
            .with_sensitivity(SensitivityTag::High);

        assert_eq!(plan.priority, Priority::High);
        assert_eq!(plan.timeout, Some(Duration::from_millis(250)));
        assert_eq!(plan.ttl, Some(Duration::from_secs(5)));
        assert_eq!(plan.sensitivity, SensitivityTag::High);
        assert!(plan.clone().without_cache().cache_key.is_none());
        assert!(!plan.as_write().read_only);
    }

    #[test]
    fn test_query_deserializes_without_params() {
        let query: Query = serde_json::from_value(json!({"text": "SELECT 1"})).unwrap();
        assert!(query.params.is_empty());
    }
}
