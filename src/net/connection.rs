//! Upgraded socket tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count open websocket bridges
//! - Close every open bridge on shutdown
//!
//! # Design Decisions
//! - Upgraded sockets outlive the request timeout, so they are closed
//!   explicitly rather than drained
//! - Close is a watch flag: a socket registered after close-all sees it
//!   immediately

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tracked socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

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
        write!(f, "ws-{}", self.0)
    }
}

/// Registry of open upgraded sockets.
#[derive(Debug, Clone)]
pub struct SocketRegistry {
    active_count: Arc<AtomicU64>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            close_tx: Arc::new(tx),
        }
    }

    /// Register a socket. The guard deregisters it on drop.
    pub fn track(&self) -> SocketGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_websockets(active);
        SocketGuard {
            active_count: Arc::clone(&self.active_count),
            close_rx: self.close_tx.subscribe(),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Signal every open socket to close.
    pub fn close_all(&self) {
        tracing::info!(sockets = self.active_count(), "Closing open sockets");
        self.close_tx.send_replace(true);
    }

    /// Wait until every socket is gone or `timeout` passes. Returns whether
    /// all closed.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }
}

impl Default for SocketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one socket's lifetime.
#[derive(Debug)]
pub struct SocketGuard {
    active_count: Arc<AtomicU64>,
    close_rx: watch::Receiver<bool>,
    id: ConnectionId,
}

impl SocketGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Resolves once the registry asks every socket to close.
    pub async fn closed(&mut self) {
        // A dropped sender means the registry is gone; treat as close.
        let _ = self.close_rx.wait_for(|closed| *closed).await;
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let remaining = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_websockets(remaining);
        tracing::trace!(connection_id = %self.id, "Socket closed");
    }
}
