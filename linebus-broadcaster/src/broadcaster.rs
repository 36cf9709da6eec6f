use std::sync::Arc;

use bytes::Bytes;

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;

/// Fans a scanned line out to every eligible connection's queue
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Enqueue `line` on every writable connection except `source`, unless
    /// `source` was admitted with echo. Returns how many queues accepted the line.
    ///
    /// Iterates a registry snapshot, so no lock is held while enqueueing.
    pub async fn broadcast(&self, source: &Connection, line: Bytes) -> usize {
        let mut delivered = 0;

        for connection in self.registry.snapshot() {
            if !connection.is_writable() {
                continue;
            }
            if connection.id() == source.id() && !source.echoes() {
                continue;
            }
            if connection.enqueue_line(line.clone()).await {
                delivered += 1;
            }
        }

        delivered
    }
}
