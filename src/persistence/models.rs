//! Stored row types for the durable message table.

use std::time::SystemTime;

/// A queue message spilled to durable storage.
///
/// `destination` holds the full header form (`/queue/<name>`), so replay can
/// reconstruct MESSAGE frames without re-deriving it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub destination: String,
    pub timestamp: SystemTime,
    pub priority: i32,
    pub body: Vec<u8>,
}
