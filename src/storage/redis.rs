// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis secondary tier.
//!
//! Each cache entry is one Redis STRING holding the JSON-encoded
//! [`SecondaryRecord`], written with `SET key value PX ttl` so Redis expires
//! it on its own. Keys are namespaced by an optional prefix so several
//! engines can share one instance.
//!
//! ```text
//! SET  myapp:users:42  {"payload":[...],"encrypted":false,...}  PX 300000
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client};
use std::time::Duration;
use tracing::debug;

use super::traits::{SecondaryRecord, SecondaryTier, TierError};
use crate::resilience::retry::{retry, RetryConfig};

const SCAN_BATCH: usize = 500;

pub struct RedisTier {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "myapp:" → "myapp:users:42")
    prefix: String,
}

impl RedisTier {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, TierError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use access_engine::storage::RedisTier;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let tier = RedisTier::with_prefix("redis://localhost", Some("myapp:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, TierError> {
        let client = Client::open(connection_string).map_err(|e| TierError::Unavailable(e.to_string()))?;

        // Startup config: fast-fail instead of hanging on a bad URL
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| TierError::Unavailable(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Translate a `*`-only glob into a Redis MATCH pattern under our prefix.
    fn match_pattern(&self, pattern: Option<&str>) -> String {
        let mut out = escape_redis_glob(&self.prefix);
        match pattern {
            Some(p) => {
                for (i, part) in p.split('*').enumerate() {
                    if i > 0 {
                        out.push('*');
                    }
                    out.push_str(&escape_redis_glob(part));
                }
            }
            None => out.push('*'),
        }
        out
    }
}

/// Escape Redis glob metacharacters other than `*`.
fn escape_redis_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '?' | '[' | ']' | '\\' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unavailable(e: redis::RedisError) -> TierError {
    TierError::Unavailable(e.to_string())
}

#[async_trait]
impl SecondaryTier for RedisTier {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<SecondaryRecord>, TierError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = cmd("GET")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        raw.map(|s| SecondaryRecord::from_json(&s)).transpose()
    }

    async fn put(&self, key: &str, record: &SecondaryRecord, ttl: Duration) -> Result<(), TierError> {
        let mut conn = self.connection.clone();
        let doc = record.to_json()?;
        // PX 0 is rejected by Redis
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let _: () = cmd("SET")
            .arg(self.prefixed_key(key))
            .arg(doc)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        let mut conn = self.connection.clone();
        let _: () = cmd("DEL")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<u64, TierError> {
        let mut conn = self.connection.clone();
        let matcher = self.match_pattern(pattern);
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&matcher)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            if !keys.is_empty() {
                let deleted: u64 = cmd("DEL").arg(&keys).query_async(&mut conn).await.map_err(unavailable)?;
                removed += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %matcher, removed, "Cleared secondary keys");
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), TierError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING").query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }
}
