//! STOMP 1.0 frame codec
//!
//! Provides incremental decoding and encoding of STOMP frames. Two framing
//! modes are supported on egress: with and without a trailing newline after
//! the NUL terminator (broker-wide setting, default with). Ingress is
//! tolerant of both.

mod decode;
mod encode;


pub use decode::Decoder;
pub use encode::Encoder;

/// Default cap on a single frame (command + headers + body).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB
