//! Registry of live connections
//!
//! The registry is the only state shared between connection tasks. A single
//! mutex guards it and is held only for the insert, remove or copy itself;
//! delivery always iterates a snapshot with the lock released.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::connection::Connection;

/// Identifier assigned to a connection when it is admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread-safe set of registered connections
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier; never reused for the registry's lifetime
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a fully constructed connection
    pub fn add(&self, connection: Arc<Connection>) {
        let id = connection.id();
        let total = {
            let mut connections = self.lock();
            connections.insert(id, connection);
            connections.len()
        };
        tracing::debug!("Connection {} registered. Total: {}", id, total);
    }

    /// Remove by identity. Returns false if the connection was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut connections = self.lock();
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };
        if removed {
            tracing::debug!("Connection {} removed. Remaining: {}", id, total);
        }
        removed
    }

    /// Point-in-time copy of the registered connections, in id order
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
