//! STOMP protocol definitions and types
//!
//! Defines the frame model, destinations, and error types shared by the
//! codec and the broker.

mod destination;
mod error;
mod frame;

pub use destination::{Destination, INVALID_DESTINATION};
pub use error::DecodeError;
pub use frame::{command, header, Frame};

/// Prefetch limit applied when neither the subscription nor the connection
/// negotiated one.
pub const DEFAULT_PREFETCH: usize = 10;
