//! STOMP frame encoder

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{header, Frame};

/// Frame encoder.
///
/// Outgoing frames always carry `content-length`; the encoder inserts it when
/// the handler omitted it. The trailing newline after the NUL terminator is
/// controlled by the broker-wide framing mode.
#[derive(Debug, Clone)]
pub struct Encoder {
    trailing_newline: bool,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Encoder {
    pub fn new(trailing_newline: bool) -> Self {
        Self { trailing_newline }
    }

    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) {
        buf.reserve(frame.command.len() + frame.body.len() + 64);

        buf.put_slice(frame.command.as_bytes());
        buf.put_u8(b'\n');

        let mut has_content_length = false;
        for (key, value) in &frame.headers {
            if key == header::CONTENT_LENGTH {
                has_content_length = true;
            }
            buf.put_slice(key.as_bytes());
            buf.put_u8(b':');
            buf.put_slice(value.as_bytes());
            buf.put_u8(b'\n');
        }
        if !has_content_length {
            buf.put_slice(header::CONTENT_LENGTH.as_bytes());
            buf.put_u8(b':');
            buf.put_slice(frame.body.len().to_string().as_bytes());
            buf.put_u8(b'\n');
        }

        buf.put_u8(b'\n');
        buf.put_slice(&frame.body);
        buf.put_u8(0);
        if self.trailing_newline {
            buf.put_u8(b'\n');
        }
    }

    /// Encode into a fresh buffer, for fan-out paths that append the same
    /// serialized frame to several connections.
    pub fn encode_to_bytes(&self, frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(frame, &mut buf);
        buf.freeze()
    }
}
