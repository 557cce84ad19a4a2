//! Connection teardown
//!
//! The unregister routine: close the shared writer, remove this connection
//! from every topic set and listener group it appears in, then drop it from
//! the registry. Idempotent, and safe on connections that never completed
//! the handshake.

use tracing::debug;

use super::Connection;

impl<S> Connection<S> {
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(writer) = &self.writer {
            debug!(
                "connection {} closing ({} unacked)",
                self.conn_id,
                writer.unacked()
            );
            writer.close();
        }

        let topic_names: Vec<String> = self.topics.drain().map(|(name, _)| name).collect();
        let queue_names: Vec<String> = self.queues.drain().map(|(name, _)| name).collect();
        self.router
            .disconnect(self.conn_id, &topic_names, &queue_names);
        self.registry.unregister(self.conn_id);
    }
}
