//! CONNECT handshake
//!
//! CONNECT is only valid as the first frame on a new socket; anything else
//! is answered with an ERROR frame and the connection is aborted.

use std::sync::Arc;

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::debug;

use super::{Connection, ConnectionError};
use crate::broker::SharedWriter;
use crate::protocol::{command, header, Frame};

// Historical wording, kept verbatim for wire compatibility with existing
// clients that match on it.
pub(crate) const EXPECTED_CONNECT: &str = "Excepted CONNECT frame.";

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read until the first complete frame arrives and run the handshake.
    pub(crate) async fn read_connect(&mut self) -> Result<(), ConnectionError> {
        loop {
            if let Some((frame, consumed)) = self.decoder.decode(&self.read_buf)? {
                self.read_buf.advance(consumed);
                return self.handle_connect(frame).await;
            }
            match self.stream.read_buf(&mut self.read_buf).await {
                Ok(0) => return Err(ConnectionError::Shutdown),
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn handle_connect(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if !frame.command.eq_ignore_ascii_case(command::CONNECT) {
            self.send_error(EXPECTED_CONNECT).await?;
            return Err(ConnectionError::Shutdown);
        }

        // Optional client-negotiated default prefetch for this session.
        if let Some(prefetch) = frame
            .header(header::PREFETCH)
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|&prefetch| prefetch > 0)
        {
            self.default_prefetch = prefetch;
        }

        let writer = Arc::new(SharedWriter::new(self.conn_id));
        self.registry.register(writer.clone());
        self.writer = Some(writer);

        debug!("connection {} established from {}", self.conn_id, self.addr);
        self.send_frame(&Frame::connected(self.conn_id)).await?;

        // CONNECT honors receipts like every other command.
        if let Some(receipt_id) = frame.header(header::RECEIPT) {
            let receipt = Frame::receipt(receipt_id);
            self.send_frame(&receipt).await?;
        }
        Ok(())
    }
}
