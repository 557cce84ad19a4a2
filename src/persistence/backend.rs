//! Storage backend trait for persistence.
//!
//! This trait defines the interface for persistence backends, allowing
//! different implementations (PostgreSQL, in-memory, etc.)

use async_trait::async_trait;

use super::error::Result;
use super::models::StoredMessage;

/// Storage backend for undeliverable queue messages.
///
/// Rows are keyed by destination and replayed in (priority, timestamp)
/// ascending order. A fetch consumes the rows it returns.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert one message row.
    async fn insert_message(&self, message: &StoredMessage) -> Result<()>;

    /// Remove and return up to `limit` rows for `destination`, ordered by
    /// (priority ASC, timestamp ASC).
    async fn fetch_messages_for_destination(
        &self,
        destination: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>>;
}
