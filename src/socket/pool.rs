//! Pool bridge: opened/closed notifications from connections.
//!
//! The pool never decides reuse here; it only tracks which connections are
//! open so they can be enumerated and torn down together.

use crate::socket::connection::PlainConnection;
use crate::socket::destination::CacheKey;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Receives lifecycle notifications from connections.
pub trait ConnectionPool: Send + Sync {
    /// Called under the connection's state lock once its connect finished.
    /// The pool may close the connection from here; the connect then fails
    /// with `ConnectionClosed`.
    fn connection_opened(&self, connection: &Arc<PlainConnection>);

    /// Called exactly once per connection, from its effective `close`.
    fn connection_closed(&self, connection: &PlainConnection);

    /// Closes every tracked connection.
    fn shutdown(&self) {}
}

struct Entry {
    key: CacheKey,
    connection: Weak<PlainConnection>,
}

/// Membership bookkeeping keyed by connection id.
pub struct ClientSocketPool {
    connections: Arc<DashMap<u64, Entry>>,
    shut_down: Arc<AtomicBool>,
    opened_total: Arc<AtomicUsize>,
}

impl Clone for ClientSocketPool {
    fn clone(&self) -> Self {
        Self {
            connections: Arc::clone(&self.connections),
            shut_down: Arc::clone(&self.shut_down),
            opened_total: Arc::clone(&self.opened_total),
        }
    }
}

impl std::fmt::Debug for ClientSocketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSocketPool")
            .field("active", &self.connections.len())
            .field("opened_total", &self.opened_total.load(Ordering::Relaxed))
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Default for ClientSocketPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSocketPool {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            shut_down: Arc::new(AtomicBool::new(false)),
            opened_total: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of connections currently open.
    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of `connection_opened` notifications ever accepted.
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    /// Open connections sharing `key`.
    pub fn connections_for(&self, key: &CacheKey) -> Vec<Arc<PlainConnection>> {
        self.connections
            .iter()
            .filter(|e| e.value().key == *key)
            .filter_map(|e| e.value().connection.upgrade())
            .collect()
    }

    fn live_connections(&self) -> Vec<Arc<PlainConnection>> {
        // Collected first: closing re-enters `connection_closed`, which
        // removes from the map.
        self.connections.iter().filter_map(|e| e.value().connection.upgrade()).collect()
    }
}

impl ConnectionPool for ClientSocketPool {
    fn connection_opened(&self, connection: &Arc<PlainConnection>) {
        self.connections.insert(
            connection.id(),
            Entry { key: connection.cache_key(), connection: Arc::downgrade(connection) },
        );
        self.opened_total.fetch_add(1, Ordering::Relaxed);

        // Checked after insertion so a concurrent shutdown either sees the
        // entry or we see the flag.
        if self.is_shut_down() {
            tracing::debug!(connection = %connection, "pool shut down; closing new connection");
            connection.close();
            return;
        }
        tracing::debug!(connection = %connection, active = self.connections.len(), "connection opened");
    }

    fn connection_closed(&self, connection: &PlainConnection) {
        if self.connections.remove(&connection.id()).is_some() {
            tracing::debug!(connection = %connection, active = self.connections.len(), "connection removed from pool");
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let live = self.live_connections();
        tracing::debug!(count = live.len(), "shutting down pool");
        for connection in live {
            connection.close();
        }
        self.connections.clear();
    }
}
