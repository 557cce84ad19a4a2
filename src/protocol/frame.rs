//! STOMP frame definitions
//!
//! A frame is a command line, a set of headers, and a null-terminated body.
//! Header keys are lowercased and values whitespace-trimmed on ingress, so
//! lookups here compare against lowercase names.

use bytes::Bytes;

use super::Destination;

/// Commands accepted from clients.
pub mod command {
    pub const CONNECT: &str = "CONNECT";
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
    pub const SEND: &str = "SEND";
    pub const DISCONNECT: &str = "DISCONNECT";
    pub const BEGIN: &str = "BEGIN";
    pub const COMMIT: &str = "COMMIT";
    pub const ABORT: &str = "ABORT";

    pub const CONNECTED: &str = "CONNECTED";
    pub const MESSAGE: &str = "MESSAGE";
    pub const RECEIPT: &str = "RECEIPT";
    pub const ERROR: &str = "ERROR";
}

/// Well-known header names.
pub mod header {
    pub const DESTINATION: &str = "destination";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const MESSAGE_ID: &str = "message-id";
    pub const SESSION: &str = "session";
    pub const PREFETCH: &str = "prefetch";
    pub const PRIORITY: &str = "priority";
}

/// A single STOMP frame.
///
/// Headers keep their wire order; duplicate keys are possible and the first
/// occurrence wins on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command name as read from the wire (ingress comparison is
    /// case-insensitive; egress frames use the uppercase constants).
    pub command: String,
    /// Header key/value pairs in wire order.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// First value for `name`, which must be lowercase.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// CONNECTED reply carrying the broker-assigned session id.
    pub fn connected(conn_id: u64) -> Self {
        Frame::new(command::CONNECTED).with_header(header::SESSION, conn_id.to_string())
    }

    /// MESSAGE frame delivering a published body to a subscriber.
    pub fn message(message_id: &str, destination: &Destination, body: Bytes) -> Self {
        Frame::new(command::MESSAGE)
            .with_header(header::MESSAGE_ID, message_id)
            .with_header(header::DESTINATION, destination.to_string())
            .with_body(body)
    }

    /// RECEIPT frame acknowledging a client-requested receipt.
    pub fn receipt(receipt_id: &str) -> Self {
        Frame::new(command::RECEIPT).with_header(header::RECEIPT_ID, receipt_id)
    }

    /// ERROR frame whose body describes the fault.
    pub fn error(text: impl Into<String>) -> Self {
        Frame::new(command::ERROR).with_body(text.into().into_bytes())
    }
}
