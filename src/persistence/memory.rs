//! In-memory storage backend.
//!
//! Used by the test suite and by brokers started without database flags.
//! Rows do not survive a restart.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::StorageBackend;
use super::error::Result;
use super::models::StoredMessage;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows across all destinations.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored rows, for assertions in tests.
    pub fn snapshot(&self) -> Vec<StoredMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.messages.lock().push(message.clone());
        Ok(())
    }

    async fn fetch_messages_for_destination(
        &self,
        destination: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let mut store = self.messages.lock();

        let mut selected: Vec<StoredMessage> = store
            .iter()
            .filter(|m| m.destination == destination)
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        selected.truncate(limit);

        let consumed: HashSet<&str> = selected.iter().map(|m| m.id.as_str()).collect();
        store.retain(|m| !consumed.contains(m.id.as_str()));

        Ok(selected)
    }
}
