//! stompd - STOMP 1.0 message broker
//!
//! A single-process broker speaking STOMP 1.0 framing over TCP. Topics fan
//! published messages out to every subscriber; queues share them fairly
//! across consumers with prefetch-based flow control, spilling undeliverable
//! messages to a durable store for replay when a consumer attaches.

pub mod broker;
pub mod codec;
pub mod config;
pub mod persistence;
pub mod protocol;

pub use broker::{Broker, BrokerConfig, Connection, Message};
pub use config::Config;
pub use persistence::{MemoryBackend, PostgresBackend, StorageBackend};
pub use protocol::{Destination, Frame};
