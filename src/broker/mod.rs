//! STOMP Broker Core
//!
//! The main broker: listener setup, connection acceptance, and the routing
//! state shared by all sessions.

mod connection;
mod registry;
mod router;
mod writer;


pub use connection::{Connection, ConnectionError};
pub use registry::Registry;
pub use router::{DispatchOutcome, Router, Subscription};
pub use writer::{SendError, SharedWriter};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::persistence::{StorageBackend, StoredMessage};
use crate::protocol::Destination;

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// TCP bind address
    pub bind_addr: SocketAddr,
    /// Listen backlog
    pub backlog: u32,
    /// Append a newline after each outgoing frame's NUL terminator
    pub frame_trailing_newline: bool,
    /// Prefetch applied when a subscription does not negotiate one
    pub default_prefetch: usize,
    /// Maximum size of a single inbound frame
    pub max_frame_size: usize,
    /// How long a new socket may take to complete the CONNECT handshake
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:44444".parse().unwrap(),
            backlog: 1024,
            frame_trailing_newline: true,
            default_prefetch: crate::protocol::DEFAULT_PREFETCH,
            max_frame_size: crate::codec::DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// A message routed through the dispatch engine.
#[derive(Debug, Clone)]
pub struct Message {
    /// Globally unique within one broker run.
    pub id: String,
    pub destination: Destination,
    pub priority: i32,
    pub timestamp: SystemTime,
    pub body: Bytes,
}

impl Message {
    pub fn to_stored(&self) -> StoredMessage {
        StoredMessage {
            id: self.id.clone(),
            destination: self.destination.to_string(),
            timestamp: self.timestamp,
            priority: self.priority,
            body: self.body.to_vec(),
        }
    }
}

/// Mints broker-unique message ids of the form
/// `msg-<unix-seconds-float>-<counter>`; the counter disambiguates mints
/// within one clock reading.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    counter: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        format!("msg-{}-{}", now, seq)
    }
}

/// The STOMP broker.
pub struct Broker {
    config: BrokerConfig,
    router: Arc<Router>,
    registry: Arc<Registry>,
    storage: Arc<dyn StorageBackend>,
    message_ids: Arc<MessageIdGenerator>,
    /// Connection ids are monotonic for the broker lifetime.
    next_conn_id: AtomicU64,
    shutdown: broadcast::Sender<()>,
}

impl Broker {
    pub fn new(config: BrokerConfig, storage: Arc<dyn StorageBackend>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            router: Arc::new(Router::new()),
            registry: Arc::new(Registry::new()),
            storage,
            message_ids: Arc::new(MessageIdGenerator::new()),
            next_conn_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = self.bind()?;
        info!("STOMP listening on {}", self.config.bind_addr);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!("new connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("failed to accept connection: {}", e);
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    self.shutdown();
                    return Ok(());
                }
            }
        }
    }

    fn bind(&self) -> Result<TcpListener, std::io::Error> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(self.config.bind_addr)?;
        socket.listen(self.config.backlog)
    }

    /// Spawn the session task for an accepted socket.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut conn = Connection::new(
            stream,
            addr,
            conn_id,
            self.router.clone(),
            self.registry.clone(),
            self.storage.clone(),
            self.message_ids.clone(),
            self.config.clone(),
        );
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let result = {
                let conn_fut = conn.run();
                tokio::pin!(conn_fut);
                tokio::select! {
                    biased;

                    result = &mut conn_fut => result,
                    _ = shutdown_rx.recv() => Ok(()),
                }
            };
            match result {
                Ok(()) | Err(ConnectionError::Shutdown) => {
                    debug!("connection {} ended", conn_id);
                }
                Err(e) => {
                    debug!("connection {} ended: {}", conn_id, e);
                }
            }
            // Every exit path runs the full unregister routine.
            conn.teardown();
        });
    }

    /// Shut down the broker; sessions unwind through their teardown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn topic_count(&self) -> usize {
        self.router.topic_count()
    }

    pub fn queue_count(&self) -> usize {
        self.router.queue_count()
    }
}
