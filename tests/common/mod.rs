//! Shared fakes for integration tests.
//!
//! [`ScriptedConnector`] opens connections onto an in-memory "store" that
//! understands just enough SQL to observe engine behavior:
//!
//! - `INSERT ...` appends its params as one row (staged inside a transaction)
//! - `SELECT ...` returns every committed row
//! - anything else affects zero rows
//!
//! Failures and latency are injected through [`ScriptedStore`].

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use access_engine::{Connector, EngineConfig, QueryOutput, StoreConnection, StoreError};

#[derive(Default)]
pub struct ScriptedStore {
    rows: Mutex<Vec<Value>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    executions: AtomicUsize,
    refuse_connections: AtomicBool,
    fail_matching: Mutex<Option<String>>,
    fail_rollback: AtomicBool,
    latency: Mutex<Duration>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Committed rows
    pub fn rows(&self) -> Vec<Value> {
        self.rows.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Statements that reached the store (including failed ones)
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Fail every statement whose text contains `needle`
    pub fn fail_statements_containing(&self, needle: &str) {
        *self.fail_matching.lock() = Some(needle.to_string());
    }

    pub fn fail_rollback(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }
}

#[derive(Clone)]
pub struct ScriptedConnector {
    pub store: Arc<ScriptedStore>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self { store: ScriptedStore::new() }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self) -> Result<ScriptedConnection, StoreError> {
        self.store.connects.fetch_add(1, Ordering::SeqCst);
        if self.store.refuse_connections.load(Ordering::SeqCst) {
            return Err(StoreError::Refused("store refused connection".into()));
        }
        Ok(ScriptedConnection {
            store: Arc::clone(&self.store),
            staged: None,
        })
    }
}

pub struct ScriptedConnection {
    store: Arc<ScriptedStore>,
    staged: Option<Vec<Value>>,
}

#[async_trait]
impl StoreConnection for ScriptedConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput, StoreError> {
        self.store.executions.fetch_add(1, Ordering::SeqCst);

        let latency = *self.store.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failing = self.store.fail_matching.lock().clone();
        if failing.is_some_and(|needle| sql.contains(&needle)) {
            return Err(StoreError::Query(format!("injected failure: {}", sql)));
        }

        let upper = sql.to_ascii_uppercase();
        if upper.contains("INSERT") {
            let row = Value::Array(params.to_vec());
            match self.staged.as_mut() {
                Some(staged) => staged.push(row),
                None => self.store.rows.lock().push(row),
            }
            return Ok(QueryOutput::affected(1));
        }
        if upper.contains("SELECT") {
            return Ok(QueryOutput::rows(self.store.rows()));
        }
        Ok(QueryOutput::affected(0))
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        self.staged = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let staged = self.staged.take().unwrap_or_default();
        self.store.rows.lock().extend(staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.staged = None;
        if self.store.fail_rollback.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionLost("rollback failed".into()));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.store.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Route engine logs to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Small, fast config: no warm-up minimum, no reaper, short backoff.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.pool.max_connections = 4;
    config.pool.min_connections = 0;
    config.pool.connection_timeout_ms = 100;
    config.pool.reap_interval_ms = 0;
    config.retry_attempts = 2;
    config.retry_delay_ms = 10;
    config.query_timeout_ms = 1_000;
    config
}
