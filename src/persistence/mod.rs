//! Persistence module for stompd.
//!
//! Durable storage for queue messages that had no consumer at publish time.
//! Rows are inserted one at a time and consumed in (priority, timestamp)
//! order when a consumer attaches.
//!
//! Uses a trait-based design allowing different backends:
//! - `PostgresBackend` (default) - relational store over tokio-postgres
//! - `MemoryBackend` - process-local store for tests and db-less runs

mod backend;
mod error;
mod memory;
mod models;
mod postgres;

pub use backend::StorageBackend;
pub use error::{PersistenceError, Result};
pub use memory::MemoryBackend;
pub use models::StoredMessage;
pub use postgres::PostgresBackend;
