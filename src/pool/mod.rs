// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded connection pool with a FIFO wait queue.
//!
//! ```text
//!   acquire ──► idle? ──yes──► borrow
//!                 │no
//!                 ▼
//!            total < max? ──yes──► reserve slot, connect
//!                 │no
//!                 ▼
//!            enqueue ticket ──► wait ≤ connection_timeout
//!                                  │
//!            release ──► head waiter gets the connection directly
//!            invalidate ──► head waiter gets a fresh slot to fill
//! ```
//!
//! # Invariants
//!
//! - `total <= max_connections` at all times; a slot is reserved before the
//!   connector is called, so concurrent creates can't overshoot.
//! - Waiters are served strictly in arrival order: handoff happens under the
//!   pool lock, and a returned connection never touches the idle list while
//!   someone is queued.
//! - A waiter that leaves the queue early, through its timeout or because the
//!   acquiring task was dropped, is removed from the queue under the lock. If
//!   a grant already reached it, the grant is passed on.
//! - A reserved slot whose connect fails, times out or is cancelled is handed
//!   back the same way, so `total` and `borrowed` never leak.
//! - Idle connections older than `idle_timeout` are closed by [`cleanup`]
//!   only while `total > min_connections`.
//!
//! [`cleanup`]: ConnectionPool::cleanup

pub mod connection;

pub use connection::{Connector, QueryOutput, StoreConnection, StoreError};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::AccessError;

struct Slot<T> {
    id: u64,
    conn: T,
    created_at: Instant,
    last_used_at: Instant,
}

/// What a queued waiter receives.
enum Grant<T> {
    /// A live connection, already counted as borrowed
    Connection(Slot<T>),
    /// A reserved slot (counted in total and borrowed); the waiter must connect
    Create,
}

struct PoolState<T> {
    idle: VecDeque<Slot<T>>,
    total: usize,
    borrowed: usize,
    waiters: VecDeque<(u64, oneshot::Sender<Grant<T>>)>,
    next_ticket: u64,
    closed: bool,
}

impl<T> PoolState<T> {
    /// Hand a grant to the head waiter, or absorb it if nobody is waiting.
    ///
    /// Waiters whose receiver is gone (cancelled acquire) are skipped.
    fn dispatch(&mut self, mut grant: Grant<T>) {
        while let Some((_, tx)) = self.waiters.pop_front() {
            match tx.send(grant) {
                Ok(()) => return,
                Err(returned) => grant = returned,
            }
        }
        self.borrowed = self.borrowed.saturating_sub(1);
        match grant {
            Grant::Connection(slot) => self.idle.push_back(slot),
            Grant::Create => self.total = self.total.saturating_sub(1),
        }
    }

    fn live_waiters(&self) -> usize {
        self.waiters.iter().filter(|(_, tx)| !tx.is_closed()).count()
    }
}

/// A slot counted in `total` and `borrowed` with no connection behind it yet.
/// Dropped unfilled, it passes the slot to the next waiter or frees it.
struct Reservation<'a, T> {
    state: &'a Mutex<PoolState<T>>,
    filled: bool,
}

impl<'a, T> Reservation<'a, T> {
    fn new(state: &'a Mutex<PoolState<T>>) -> Self {
        Self { state, filled: false }
    }

    fn fill(mut self) {
        self.filled = true;
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if !self.filled {
            self.state.lock().dispatch(Grant::Create);
        }
    }
}

/// A queued acquire. Dropped before it received its grant, it leaves the
/// queue, or forwards a grant that arrived in the meantime.
struct Waiter<'a, T> {
    state: &'a Mutex<PoolState<T>>,
    ticket: u64,
    rx: oneshot::Receiver<Grant<T>>,
    received: bool,
}

impl<T> Waiter<'_, T> {
    async fn recv(&mut self) -> Result<Grant<T>, oneshot::error::RecvError> {
        let grant = (&mut self.rx).await;
        self.received = true;
        grant
    }
}

impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        if self.received {
            return;
        }
        let mut state = self.state.lock();
        if let Some(pos) = state.waiters.iter().position(|(t, _)| *t == self.ticket) {
            state.waiters.remove(pos);
        } else if let Ok(grant) = self.rx.try_recv() {
            // Served between leaving the wait and taking the lock
            state.dispatch(grant);
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub borrowed: usize,
    pub waiting: usize,
    pub max: usize,
    /// `borrowed / max`
    pub utilization: f64,
    pub created: u64,
    pub timeouts: u64,
}

/// A bounded pool of store connections.
///
/// Shared as `Arc<ConnectionPool<C>>`; borrowed connections hold a reference
/// back to the pool and return themselves on drop.
pub struct ConnectionPool<C: Connector> {
    name: String,
    connector: C,
    config: PoolConfig,
    state: Mutex<PoolState<C::Connection>>,
    next_id: AtomicU64,
    created: AtomicU64,
    timeouts: AtomicU64,
}

enum Next<T> {
    Ready(Slot<T>),
    Create,
    Wait(u64, oneshot::Receiver<Grant<T>>),
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(name: impl Into<String>, connector: C, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            connector,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                borrowed: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
                closed: false,
            }),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Borrow a connection, waiting up to `connection_timeout` in FIFO order.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<C>, AccessError> {
        self.acquire_timeout(self.config.connection_timeout()).await
    }

    /// Borrow a connection, waiting at most `limit` instead of the configured
    /// `connection_timeout`. Dropping the future at any point gives back
    /// whatever it had reserved or been handed.
    #[tracing::instrument(skip(self, limit), fields(pool = %self.name, limit_ms = limit.as_millis() as u64))]
    pub async fn acquire_timeout(self: &Arc<Self>, limit: Duration) -> Result<PooledConnection<C>, AccessError> {
        let started = Instant::now();

        let next = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(AccessError::PoolClosed(self.name.clone()));
            }
            if let Some(slot) = state.idle.pop_back() {
                state.borrowed += 1;
                Next::Ready(slot)
            } else if state.total < self.config.max_connections {
                state.total += 1;
                state.borrowed += 1;
                Next::Create
            } else {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back((ticket, tx));
                Next::Wait(ticket, rx)
            }
        };

        let slot = match next {
            Next::Ready(slot) => slot,
            Next::Create => {
                let reservation = Reservation::new(&self.state);
                self.create_reserved(reservation, started + limit).await?
            }
            Next::Wait(ticket, rx) => {
                let mut waiter = Waiter {
                    state: &self.state,
                    ticket,
                    rx,
                    received: false,
                };
                let remaining = limit.saturating_sub(started.elapsed());
                let granted = timeout(remaining, waiter.recv()).await;
                match granted {
                    Ok(Ok(Grant::Connection(slot))) => slot,
                    Ok(Ok(Grant::Create)) => {
                        let reservation = Reservation::new(&self.state);
                        self.create_reserved(reservation, started + limit).await?
                    }
                    Ok(Err(_)) => return Err(AccessError::PoolClosed(self.name.clone())),
                    Err(_) => {
                        drop(waiter);
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                        let waited = started.elapsed();
                        warn!(pool = %self.name, waited_ms = waited.as_millis() as u64, "Connection acquire timed out");
                        return Err(AccessError::ConnectionTimeout { waited });
                    }
                }
            }
        };

        crate::metrics::record_acquire_wait(&self.name, started.elapsed());
        self.publish();
        Ok(PooledConnection {
            pool: Arc::clone(self),
            slot: Some(slot),
        })
    }

    /// Fill a slot already counted in `total`/`borrowed`.
    async fn create_reserved(
        &self,
        reservation: Reservation<'_, C::Connection>,
        deadline: Instant,
    ) -> Result<Slot<C::Connection>, AccessError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = timeout(remaining, self.connector.connect()).await;

        match outcome {
            Ok(Ok(conn)) => {
                reservation.fill();
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.created.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_connection_event(&self.name, "created");
                debug!(pool = %self.name, connection_id = id, "Opened connection");
                let now = Instant::now();
                Ok(Slot { id, conn, created_at: now, last_used_at: now })
            }
            Ok(Err(e)) => {
                drop(reservation);
                warn!(pool = %self.name, error = %e, "Connection creation failed");
                Err(AccessError::ConnectionCreation(e))
            }
            Err(_) => {
                drop(reservation);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(pool = %self.name, "Connection creation timed out");
                Err(AccessError::ConnectionTimeout { waited: remaining })
            }
        }
    }

    fn release_slot(&self, mut slot: Slot<C::Connection>) {
        slot.last_used_at = Instant::now();
        let mut state = self.state.lock();
        if state.closed {
            state.borrowed = state.borrowed.saturating_sub(1);
            state.total = state.total.saturating_sub(1);
            return;
        }
        state.dispatch(Grant::Connection(slot));
        drop(state);
        self.publish();
    }

    async fn discard_slot(&self, mut slot: Slot<C::Connection>) {
        {
            let mut state = self.state.lock();
            if state.closed {
                state.borrowed = state.borrowed.saturating_sub(1);
                state.total = state.total.saturating_sub(1);
            } else {
                state.dispatch(Grant::Create);
            }
        }
        debug!(pool = %self.name, connection_id = slot.id, "Discarding connection");
        crate::metrics::record_connection_event(&self.name, "invalidated");
        slot.conn.close().await;
        self.publish();
    }

    /// Open connections until `min_connections` exist.
    pub async fn warm_up(&self) -> Result<usize, AccessError> {
        let mut opened = 0;
        loop {
            {
                let mut state = self.state.lock();
                if state.closed || state.total >= self.config.min_connections {
                    break;
                }
                // Counts as borrowed until dispatched, so a waiter can take it
                state.total += 1;
                state.borrowed += 1;
            }
            let reservation = Reservation::new(&self.state);
            let conn = self.connector.connect().await.map_err(AccessError::ConnectionCreation)?;
            reservation.fill();

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.created.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_connection_event(&self.name, "created");
            let now = Instant::now();
            let slot = Slot { id, conn, created_at: now, last_used_at: now };
            self.state.lock().dispatch(Grant::Connection(slot));
            opened += 1;
        }
        if opened > 0 {
            info!(pool = %self.name, opened, "Pool warmed up");
        }
        self.publish();
        Ok(opened)
    }

    /// Close idle connections past `idle_timeout`, never dropping below
    /// `min_connections`. Returns how many were closed.
    pub async fn cleanup(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let now = Instant::now();
        let expired: Vec<Slot<C::Connection>> = {
            let mut state = self.state.lock();
            let mut out = Vec::new();
            let mut i = 0;
            while i < state.idle.len() && state.total > self.config.min_connections {
                if now.saturating_duration_since(state.idle[i].last_used_at) > idle_timeout {
                    if let Some(slot) = state.idle.remove(i) {
                        state.total -= 1;
                        out.push(slot);
                    }
                } else {
                    i += 1;
                }
            }
            out
        };

        let count = expired.len();
        for mut slot in expired {
            debug!(
                pool = %self.name,
                connection_id = slot.id,
                age_ms = slot.created_at.elapsed().as_millis() as u64,
                "Reaping idle connection"
            );
            crate::metrics::record_connection_event(&self.name, "reaped");
            slot.conn.close().await;
        }
        if count > 0 {
            self.publish();
        }
        count
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until the pool is
    /// closed or dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                if pool.is_closed() {
                    break;
                }
                pool.cleanup().await;
            }
        })
    }

    /// Refuse new acquires, fail queued waiters and close idle connections.
    ///
    /// Borrowed connections are closed as they come back.
    pub async fn close(&self) {
        let idle: Vec<Slot<C::Connection>> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            // Dropping the senders wakes every waiter with PoolClosed
            state.waiters.clear();
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.total -= idle.len();
            idle
        };
        for mut slot in idle {
            crate::metrics::record_connection_event(&self.name, "closed");
            slot.conn.close().await;
        }
        info!(pool = %self.name, "Pool closed");
        self.publish();
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let max = self.config.max_connections;
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            borrowed: state.borrowed,
            waiting: state.live_waiters(),
            max,
            utilization: if max == 0 { 0.0 } else { state.borrowed as f64 / max as f64 },
            created: self.created.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    fn publish(&self) {
        let stats = self.stats();
        crate::metrics::set_pool_connections(&self.name, stats.borrowed, stats.idle, stats.waiting);
    }
}

/// A borrowed connection. Returns to its pool when dropped.
pub struct PooledConnection<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    slot: Option<Slot<C::Connection>>,
}

impl<C: Connector> PooledConnection<C> {
    /// Pool-assigned connection id (stable for the connection's life)
    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot.as_ref().map_or(0, |s| s.id)
    }

    #[must_use]
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    fn conn(&mut self) -> Result<&mut C::Connection, StoreError> {
        self.slot
            .as_mut()
            .map(|s| &mut s.conn)
            .ok_or_else(|| StoreError::ConnectionLost("connection already returned".into()))
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput, StoreError> {
        self.conn()?.execute(sql, params).await
    }

    pub async fn begin(&mut self) -> Result<(), StoreError> {
        self.conn()?.begin().await
    }

    pub async fn commit(&mut self) -> Result<(), StoreError> {
        self.conn()?.commit().await
    }

    pub async fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn()?.rollback().await
    }

    /// Return the connection for reuse (same as dropping it).
    pub fn release(self) {}

    /// Close the connection instead of reusing it; a queued waiter gets
    /// a fresh slot.
    pub async fn invalidate(mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.discard_slot(slot).await;
        }
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release_slot(slot);
        }
    }
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name)
            .field("id", &self.id())
            .finish()
    }
}
