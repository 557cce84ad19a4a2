//! Connection registry
//!
//! The set of live client sessions, keyed by connection id. Each entry holds
//! the session's shared output writer. Index membership for a departing
//! connection is cleaned up by the teardown routine in
//! `connection::disconnect`, which consults the connection's own local
//! subscription maps.

use std::sync::Arc;

use dashmap::DashMap;

use super::writer::SharedWriter;

#[derive(Debug, Default)]
pub struct Registry {
    connections: DashMap<u64, Arc<SharedWriter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, writer: Arc<SharedWriter>) {
        self.connections.insert(writer.conn_id(), writer);
    }

    /// Idempotent; safe for ids that never completed the handshake.
    pub fn unregister(&self, conn_id: u64) {
        self.connections.remove(&conn_id);
    }

    pub fn get(&self, conn_id: u64) -> Option<Arc<SharedWriter>> {
        self.connections
            .get(&conn_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, conn_id: u64) -> bool {
        self.connections.contains_key(&conn_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
