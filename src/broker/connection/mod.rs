//! STOMP connection handler
//!
//! Owns one client socket: decodes frames, dispatches commands, and flushes
//! frames routed to this session by other connections.

mod connect;
mod disconnect;
mod send;
mod subscribe;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::broker::{BrokerConfig, MessageIdGenerator, Registry, Router, SharedWriter, Subscription};
use crate::codec::{Decoder, Encoder};
use crate::persistence::{PersistenceError, StorageBackend};
use crate::protocol::{command, header, DecodeError, Destination, Frame, INVALID_DESTINATION};

/// Connection error types
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Decode(DecodeError),
    Persistence(PersistenceError),
    /// CONNECT handshake did not complete in time
    Timeout,
    /// Orderly termination (DISCONNECT, failed handshake, or writer closed)
    Shutdown,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "IO error: {}", e),
            ConnectionError::Decode(e) => write!(f, "decode error: {}", e),
            ConnectionError::Persistence(e) => write!(f, "persistence error: {}", e),
            ConnectionError::Timeout => write!(f, "connect timeout"),
            ConnectionError::Shutdown => write!(f, "shutdown"),
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<DecodeError> for ConnectionError {
    fn from(e: DecodeError) -> Self {
        ConnectionError::Decode(e)
    }
}

impl From<PersistenceError> for ConnectionError {
    fn from(e: PersistenceError) -> Self {
        ConnectionError::Persistence(e)
    }
}

/// Connection handler - generic over the stream type
pub struct Connection<S> {
    pub(crate) stream: S,
    pub(crate) addr: SocketAddr,
    pub(crate) conn_id: u64,
    pub(crate) decoder: Decoder,
    pub(crate) encoder: Encoder,
    pub(crate) read_buf: BytesMut,
    pub(crate) write_buf: BytesMut,
    pub(crate) router: Arc<Router>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) storage: Arc<dyn StorageBackend>,
    pub(crate) message_ids: Arc<MessageIdGenerator>,
    pub(crate) config: BrokerConfig,
    /// Shared output buffer for this session (created after CONNECT)
    pub(crate) writer: Option<Arc<SharedWriter>>,
    /// This session's topic subscriptions by topic name
    pub(crate) topics: HashMap<String, Arc<Subscription>>,
    /// This session's queue subscriptions by queue name
    pub(crate) queues: HashMap<String, Arc<Subscription>>,
    /// Prefetch negotiated on CONNECT, applied when SUBSCRIBE omits one
    pub(crate) default_prefetch: usize,
    pub(crate) torn_down: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: S,
        addr: SocketAddr,
        conn_id: u64,
        router: Arc<Router>,
        registry: Arc<Registry>,
        storage: Arc<dyn StorageBackend>,
        message_ids: Arc<MessageIdGenerator>,
        config: BrokerConfig,
    ) -> Self {
        let decoder = Decoder::new().with_max_frame_size(config.max_frame_size);
        let encoder = Encoder::new(config.frame_trailing_newline);
        let default_prefetch = config.default_prefetch;
        Self {
            stream,
            addr,
            conn_id,
            decoder,
            encoder,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            router,
            registry,
            storage,
            message_ids,
            config,
            writer: None,
            topics: HashMap::new(),
            queues: HashMap::new(),
            default_prefetch,
            torn_down: false,
        }
    }

    /// Run the connection: CONNECT handshake, then the frame loop.
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        match timeout(self.config.connect_timeout, self.read_connect()).await {
            Ok(result) => result?,
            Err(_) => {
                debug!("connect timeout from {}", self.addr);
                return Err(ConnectionError::Timeout);
            }
        }
        self.run_connected().await
    }

    /// Run the main connection loop
    async fn run_connected(&mut self) -> Result<(), ConnectionError> {
        // Frames pipelined behind CONNECT may already be buffered.
        while let Some((frame, consumed)) = self.decoder.decode(&self.read_buf)? {
            self.read_buf.advance(consumed);
            self.handle_frame(frame).await?;
        }

        loop {
            tokio::select! {
                // Read from socket
                result = self.stream.read_buf(&mut self.read_buf) => {
                    match result {
                        Ok(0) => {
                            debug!("connection {} closed by peer", self.conn_id);
                            return Ok(());
                        }
                        Ok(_) => {
                            while let Some((frame, consumed)) = self.decoder.decode(&self.read_buf)? {
                                self.read_buf.advance(consumed);
                                self.handle_frame(frame).await?;
                            }
                        }
                        Err(e) => {
                            debug!("read error on connection {}: {}", self.conn_id, e);
                            return Err(e.into());
                        }
                    }
                }

                // Flush frames routed to this session by other connections
                _ = async {
                    match &self.writer {
                        Some(writer) => writer.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.flush_writer().await?;
                }
            }
        }
    }

    async fn flush_writer(&mut self) -> Result<(), ConnectionError> {
        let Some(writer) = self.writer.clone() else {
            return Ok(());
        };
        let data = writer.take_buffer();
        if !data.is_empty() {
            self.stream.write_all(&data).await?;
        }
        if !writer.is_alive() {
            debug!("shared writer closed, disconnecting {}", self.conn_id);
            return Err(ConnectionError::Shutdown);
        }
        Ok(())
    }

    /// Dispatch one frame by its command, matched case-insensitively, then
    /// acknowledge a requested receipt once the handler's effect completes.
    /// DISCONNECT is the one table entry outside the receipt wrapper; an
    /// unknown command gets the ERROR reply and no receipt.
    pub(crate) async fn handle_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let receipt = frame.header(header::RECEIPT).map(str::to_owned);
        let cmd = frame.command.to_ascii_uppercase();
        match cmd.as_str() {
            command::SUBSCRIBE => self.handle_subscribe(&frame).await?,
            command::UNSUBSCRIBE => self.handle_unsubscribe(&frame).await?,
            command::SEND => self.handle_send(&frame).await?,
            command::DISCONNECT => {
                debug!("DISCONNECT from connection {}", self.conn_id);
                return Err(ConnectionError::Shutdown);
            }
            // Transactions are accepted and ignored.
            command::BEGIN | command::COMMIT | command::ABORT => {}
            command::CONNECT => {
                self.send_error("Already connected.").await?;
            }
            other => {
                self.send_error(&format!("Unknown command: {}", other))
                    .await?;
                return Ok(());
            }
        }
        if let Some(receipt_id) = receipt {
            self.send_frame(&Frame::receipt(&receipt_id)).await?;
        }
        Ok(())
    }

    /// Parse the destination header; on failure answer with the ERROR frame
    /// and report `None` (the connection stays open).
    pub(crate) async fn parse_destination(
        &mut self,
        frame: &Frame,
    ) -> Result<Option<Destination>, ConnectionError> {
        match frame.header(header::DESTINATION).and_then(Destination::parse) {
            Some(destination) => Ok(Some(destination)),
            None => {
                self.send_error(INVALID_DESTINATION).await?;
                Ok(None)
            }
        }
    }

    /// Write one frame directly to this session's socket.
    pub(crate) async fn send_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        self.write_buf.clear();
        self.encoder.encode(frame, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        Ok(())
    }

    pub(crate) async fn send_error(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.send_frame(&Frame::error(text)).await
    }
}
