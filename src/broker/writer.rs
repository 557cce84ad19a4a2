//! Direct write buffer for routed frames.
//!
//! SharedWriter lets the dispatcher append pre-serialized frames to a
//! per-connection buffer; the connection task flushes the buffer to its own
//! socket. Appends are whole frames, so concurrent publishers never
//! interleave partial frames on one stream.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Error when sending to a SharedWriter
#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    /// Connection is closed
    Closed,
}

pub struct SharedWriter {
    conn_id: u64,
    /// Pre-serialized frames waiting to be written
    buffer: Mutex<BytesMut>,
    /// Notification when the buffer has new data
    notify: Notify,
    /// Whether the connection is still alive
    alive: AtomicBool,
    /// Messages delivered on this connection and never acknowledged
    unacked: AtomicUsize,
}

impl SharedWriter {
    pub fn new(conn_id: u64) -> Self {
        Self {
            conn_id,
            buffer: Mutex::new(BytesMut::with_capacity(2048)),
            notify: Notify::new(),
            alive: AtomicBool::new(true),
            unacked: AtomicUsize::new(0),
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the connection as closed and wake its flush loop.
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.notify.notify_one();
    }

    /// Get the notify handle for the connection loop
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Take all pending data from the buffer
    pub fn take_buffer(&self) -> BytesMut {
        let mut buf = self.buffer.lock();
        buf.split()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Append one pre-serialized frame to the buffer.
    pub fn send_bytes(&self, frame: &[u8]) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }

        let was_empty = {
            let mut buffer = self.buffer.lock();
            let was_empty = buffer.is_empty();
            buffer.extend_from_slice(frame);
            was_empty
        };

        // Only notify if the buffer was empty - coalesces notifications
        // during bursts.
        if was_empty {
            self.notify.notify_one();
        }
        Ok(())
    }

    pub fn add_unacked(&self, n: usize) {
        self.unacked.fetch_add(n, Ordering::Relaxed);
    }

    pub fn unacked(&self) -> usize {
        self.unacked.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWriter")
            .field("conn_id", &self.conn_id)
            .field("buffer_len", &self.buffer_len())
            .field("alive", &self.is_alive())
            .finish()
    }
}
