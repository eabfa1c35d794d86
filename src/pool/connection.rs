// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backing-store seam.
//!
//! The engine never talks to a database driver directly. A [`Connector`]
//! opens [`StoreConnection`]s and the pool owns their lifecycle. The `sql`
//! feature ships a sqlx-backed implementation; tests script their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure reported by the backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store refused to open a connection
    #[error("connection refused: {0}")]
    Refused(String),

    /// The statement failed
    #[error("query failed: {0}")]
    Query(String),

    /// The connection broke mid-use
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Rows returned by a statement plus its affected-row count.
///
/// Rows are JSON objects keyed by column name so they can be cached and
/// shipped over the service surface unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<Value>,
    pub rows_affected: u64,
}

impl QueryOutput {
    #[must_use]
    pub fn rows(rows: Vec<Value>) -> Self {
        Self { rows, rows_affected: 0 }
    }

    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self { rows: Vec::new(), rows_affected }
    }
}

/// A single live connection to the backing store.
#[async_trait]
pub trait StoreConnection: Send + 'static {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput, StoreError>;

    async fn begin(&mut self) -> Result<(), StoreError>;
    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Release driver resources. Called when the pool discards the connection.
    async fn close(&mut self) {}
}

/// Opens connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: StoreConnection;

    async fn connect(&self) -> Result<Self::Connection, StoreError>;
}
