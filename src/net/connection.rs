//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Accepting → Connecting → Proxying → Closing)
//! - Generate unique connection IDs for tracing
//! - Count live connections for the lifecycle API and the active-connections gauge

use std::cell::Cell;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TLS handshake, if configured. No frames are read.
    Accepting,
    /// Opening the upstream connection.
    Connecting,
    /// Frames flow in both directions.
    Proxying,
    /// Terminal.
    Closing,
}

/// One side of a proxied session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Broker,
}

impl Leg {
    /// Metric and log label.
    pub fn name(self) -> &'static str {
        match self {
            Leg::Client => "client",
            Leg::Broker => "broker",
        }
    }
}

/// One client ↔ broker session, owned by its worker loop.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    client: SocketAddr,
    upstream: Cell<Option<SocketAddr>>,
    state: Cell<ConnectionState>,
    tls: Cell<bool>,
    client_reads: Cell<bool>,
    broker_reads: Cell<bool>,
}

impl Connection {
    pub fn new(id: ConnectionId, client: SocketAddr) -> Self {
        Self {
            id,
            client,
            upstream: Cell::new(None),
            state: Cell::new(ConnectionState::Accepting),
            tls: Cell::new(false),
            client_reads: Cell::new(true),
            broker_reads: Cell::new(true),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client
    }

    pub fn upstream_addr(&self) -> Option<SocketAddr> {
        self.upstream.get()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.get()
    }

    pub fn mark_tls(&self) {
        self.tls.set(true);
    }

    /// Whether frames are currently read from `leg`.
    pub fn reads_enabled(&self, leg: Leg) -> bool {
        self.read_flag(leg).get()
    }

    /// Toggle reading on `leg`. Returns the previous value.
    pub fn set_reads_enabled(&self, leg: Leg, enabled: bool) -> bool {
        self.read_flag(leg).replace(enabled)
    }

    fn read_flag(&self, leg: Leg) -> &Cell<bool> {
        match leg {
            Leg::Client => &self.client_reads,
            Leg::Broker => &self.broker_reads,
        }
    }

    /// Record the upstream peer. Only the first call has an effect.
    pub fn bind_upstream(&self, addr: SocketAddr) -> bool {
        if self.upstream.get().is_some() {
            return false;
        }
        self.upstream.set(Some(addr));
        true
    }

    /// Move to `next`. Closing is terminal; returns `false` if the move is refused.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let current = self.state.get();
        if current == ConnectionState::Closing {
            return false;
        }
        tracing::trace!(connection_id = %self.id, from = ?current, to = ?next, "Connection state change");
        self.state.set(next);
        true
    }
}

/// Tracks live connections across every worker loop.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened();
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
