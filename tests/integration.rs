//! Integration tests for the stompd STOMP broker
//!
//! These connect real clients over TCP and validate the protocol flows:
//! fan-out, queue round-robin, prefetch flow control, persisted replay,
//! receipts, and handshake errors.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use stompd::broker::{Broker, BrokerConfig};
use stompd::codec::{Decoder, Encoder};
use stompd::persistence::MemoryBackend;
use stompd::protocol::Frame;

// Atomic port counter to avoid port conflicts between tests
static PORT_COUNTER: AtomicU16 = AtomicU16::new(29000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

fn start_broker() -> (SocketAddr, Arc<MemoryBackend>) {
    let addr = SocketAddr::from(([127, 0, 0, 1], next_port()));
    let storage = Arc::new(MemoryBackend::new());
    let config = BrokerConfig {
        bind_addr: addr,
        connect_timeout: Duration::from_secs(5),
        ..BrokerConfig::default()
    };
    let broker = Broker::new(config, storage.clone());
    tokio::spawn(async move {
        let _ = broker.run().await;
    });
    (addr, storage)
}

/// Helper struct for STOMP client operations in tests
struct TestClient {
    stream: TcpStream,
    decoder: Decoder,
    encoder: Encoder,
    buf: BytesMut,
    session: u64,
}

impl TestClient {
    /// Open a socket without performing the CONNECT handshake.
    async fn open(addr: SocketAddr) -> Self {
        // The broker task may still be binding; retry briefly.
        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(_) => sleep(Duration::from_millis(10)).await,
            }
        };
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::default(),
            buf: BytesMut::new(),
            session: 0,
        }
    }

    /// Open a socket and complete the CONNECT handshake.
    async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::open(addr).await;
        client.send(&Frame::new("CONNECT")).await;
        let connected = client.recv().await.expect("expected CONNECTED");
        assert_eq!(connected.command, "CONNECTED");
        client.session = connected
            .header("session")
            .expect("missing session header")
            .parse()
            .expect("session id not numeric");
        client
    }

    async fn send(&mut self, frame: &Frame) {
        let wire = self.encoder.encode_to_bytes(frame);
        self.stream.write_all(&wire).await.expect("write failed");
    }

    async fn recv_timeout(&mut self, wait: Duration) -> Option<Frame> {
        loop {
            if let Some((frame, consumed)) =
                self.decoder.decode(&self.buf).expect("decode error")
            {
                self.buf.advance(consumed);
                return Some(frame);
            }
            let mut chunk = [0u8; 4096];
            match timeout(wait, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return None,
                Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
                Ok(Err(_)) | Err(_) => return None,
            }
        }
    }

    async fn recv(&mut self) -> Option<Frame> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    /// Subscribe and wait for the receipt, so the subscription is guaranteed
    /// to be in effect before the caller publishes.
    async fn subscribe(&mut self, destination: &str) {
        self.subscribe_with_prefetch(destination, None).await;
    }

    async fn subscribe_with_prefetch(&mut self, destination: &str, prefetch: Option<usize>) {
        let mut frame = Frame::new("SUBSCRIBE")
            .with_header("destination", destination)
            .with_header("receipt", "sub-receipt");
        if let Some(prefetch) = prefetch {
            frame = frame.with_header("prefetch", prefetch.to_string());
        }
        self.send(&frame).await;
        let receipt = self.recv().await.expect("expected RECEIPT");
        assert_eq!(receipt.command, "RECEIPT");
    }

    async fn publish(&mut self, destination: &str, body: &str) {
        let frame = Frame::new("SEND")
            .with_header("destination", destination)
            .with_body(body.as_bytes().to_vec());
        self.send(&frame).await;
    }

    async fn expect_message(&mut self, destination: &str, body: &str) -> Frame {
        let frame = self.recv().await.expect("expected MESSAGE");
        assert_eq!(frame.command, "MESSAGE");
        assert_eq!(frame.header("destination"), Some(destination));
        assert_eq!(&frame.body[..], body.as_bytes());
        frame
    }
}

async fn wait_for_rows(storage: &MemoryBackend, expected: usize) {
    for _ in 0..100 {
        if storage.len() == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} persisted rows, found {}", expected, storage.len());
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn connect_handshake_returns_session_id() {
    let (addr, _storage) = start_broker();
    let first = TestClient::connect(addr).await;
    let second = TestClient::connect(addr).await;
    // Ids are monotonic for the broker lifetime.
    assert!(second.session > first.session);
}

#[tokio::test]
async fn first_frame_other_than_connect_is_rejected() {
    let (addr, _storage) = start_broker();
    let mut client = TestClient::open(addr).await;
    client
        .send(
            &Frame::new("SEND")
                .with_header("destination", "/queue/work")
                .with_body(b"oops".to_vec()),
        )
        .await;

    let error = client.recv().await.expect("expected ERROR");
    assert_eq!(error.command, "ERROR");
    let body = String::from_utf8(error.body.to_vec()).unwrap();
    assert!(body.starts_with("Excepted CONNECT frame."), "body: {}", body);

    // The broker aborts the connection after the error.
    assert!(client.recv().await.is_none());
}

// ============================================================================
// Topic fan-out
// ============================================================================

#[tokio::test]
async fn topic_publish_fans_out_to_all_subscribers() {
    let (addr, storage) = start_broker();
    let mut sub_a = TestClient::connect(addr).await;
    let mut sub_b = TestClient::connect(addr).await;
    let mut publisher = TestClient::connect(addr).await;

    sub_a.subscribe("/topic/news").await;
    sub_b.subscribe("/topic/news").await;
    publisher.publish("/topic/news", "hello").await;

    let frame = sub_a.expect_message("/topic/news", "hello").await;
    assert_eq!(frame.header("content-length"), Some("5"));
    assert!(frame.header("message-id").is_some());
    sub_b.expect_message("/topic/news", "hello").await;

    // Topics never persist.
    assert!(storage.is_empty());
}

#[tokio::test]
async fn unsubscribed_topic_member_stops_receiving() {
    let (addr, _storage) = start_broker();
    let mut subscriber = TestClient::connect(addr).await;
    let mut publisher = TestClient::connect(addr).await;

    subscriber.subscribe("/topic/news").await;
    subscriber
        .send(
            &Frame::new("UNSUBSCRIBE")
                .with_header("destination", "/topic/news")
                .with_header("receipt", "u1"),
        )
        .await;
    let receipt = subscriber.recv().await.expect("expected RECEIPT");
    assert_eq!(receipt.header("receipt-id"), Some("u1"));

    publisher.publish("/topic/news", "after-unsub").await;
    assert!(subscriber
        .recv_timeout(Duration::from_millis(300))
        .await
        .is_none());
}

// ============================================================================
// Queue round-robin and prefetch
// ============================================================================

#[tokio::test]
async fn queue_round_robin_alternates_from_highest_session() {
    let (addr, _storage) = start_broker();
    let mut consumer_a = TestClient::connect(addr).await;
    let mut consumer_b = TestClient::connect(addr).await;
    let mut publisher = TestClient::connect(addr).await;
    assert!(consumer_b.session > consumer_a.session);

    consumer_a.subscribe("/queue/work").await;
    consumer_b.subscribe("/queue/work").await;

    for body in ["m1", "m2", "m3"] {
        publisher.publish("/queue/work", body).await;
    }

    // Descending session order: first to B, then A, then wrap to B.
    consumer_b.expect_message("/queue/work", "m1").await;
    consumer_a.expect_message("/queue/work", "m2").await;
    consumer_b.expect_message("/queue/work", "m3").await;
}

#[tokio::test]
async fn prefetch_caps_do_not_lose_messages_for_sole_consumer() {
    let (addr, storage) = start_broker();
    let mut consumer = TestClient::connect(addr).await;
    let mut publisher = TestClient::connect(addr).await;

    consumer
        .subscribe_with_prefetch("/queue/slow", Some(2))
        .await;

    for body in ["m1", "m2", "m3"] {
        publisher.publish("/queue/slow", body).await;
    }

    // The subscription blocks after m2, but with a live listener group the
    // cursor re-selects the same sole member rather than spilling to disk.
    consumer.expect_message("/queue/slow", "m1").await;
    consumer.expect_message("/queue/slow", "m2").await;
    consumer.expect_message("/queue/slow", "m3").await;
    assert!(storage.is_empty());
}

// ============================================================================
// Persistence and replay
// ============================================================================

#[tokio::test]
async fn send_to_queue_without_consumers_persists_one_row() {
    let (addr, storage) = start_broker();
    let mut publisher = TestClient::connect(addr).await;

    publisher.publish("/queue/backlog", "stored").await;
    wait_for_rows(&storage, 1).await;

    let rows = storage.snapshot();
    assert_eq!(rows[0].destination, "/queue/backlog");
    assert_eq!(rows[0].body, b"stored".to_vec());
    assert_eq!(rows[0].priority, 0);
}

#[tokio::test]
async fn persisted_messages_replay_in_priority_order() {
    let (addr, storage) = start_broker();
    let mut publisher = TestClient::connect(addr).await;

    for (body, priority) in [("p5", 5), ("p1", 1), ("p3", 3)] {
        publisher
            .send(
                &Frame::new("SEND")
                    .with_header("destination", "/queue/pending")
                    .with_header("priority", priority.to_string())
                    .with_body(body.as_bytes().to_vec()),
            )
            .await;
    }
    wait_for_rows(&storage, 3).await;

    let mut consumer = TestClient::connect(addr).await;
    consumer
        .send(&Frame::new("SUBSCRIBE").with_header("destination", "/queue/pending"))
        .await;
    consumer.expect_message("/queue/pending", "p1").await;
    consumer.expect_message("/queue/pending", "p3").await;
    consumer.expect_message("/queue/pending", "p5").await;

    // Replayed rows are consumed.
    assert!(storage.is_empty());
}

#[tokio::test]
async fn replay_precedes_subscribe_receipt() {
    let (addr, storage) = start_broker();
    let mut publisher = TestClient::connect(addr).await;
    publisher.publish("/queue/pending", "early").await;
    wait_for_rows(&storage, 1).await;

    let mut consumer = TestClient::connect(addr).await;
    consumer
        .send(
            &Frame::new("SUBSCRIBE")
                .with_header("destination", "/queue/pending")
                .with_header("receipt", "r1"),
        )
        .await;

    let first = consumer.recv().await.expect("expected MESSAGE");
    assert_eq!(first.command, "MESSAGE");
    let second = consumer.recv().await.expect("expected RECEIPT");
    assert_eq!(second.command, "RECEIPT");
    assert_eq!(second.header("receipt-id"), Some("r1"));
}

// ============================================================================
// Receipts and errors
// ============================================================================

#[tokio::test]
async fn double_unsubscribe_is_a_noop_with_receipts() {
    let (addr, _storage) = start_broker();
    let mut client = TestClient::connect(addr).await;
    client.subscribe("/queue/work").await;

    for receipt_id in ["u1", "u2"] {
        client
            .send(
                &Frame::new("UNSUBSCRIBE")
                    .with_header("destination", "/queue/work")
                    .with_header("receipt", receipt_id),
            )
            .await;
        let receipt = client.recv().await.expect("expected RECEIPT");
        assert_eq!(receipt.command, "RECEIPT");
        assert_eq!(receipt.header("receipt-id"), Some(receipt_id));
    }
}

#[tokio::test]
async fn unknown_command_errors_but_connection_survives() {
    let (addr, _storage) = start_broker();
    let mut client = TestClient::connect(addr).await;

    client.send(&Frame::new("WOBBLE")).await;
    let error = client.recv().await.expect("expected ERROR");
    assert_eq!(error.command, "ERROR");
    let body = String::from_utf8(error.body.to_vec()).unwrap();
    assert!(body.contains("WOBBLE"), "body: {}", body);

    // Still usable afterwards.
    client
        .send(&Frame::new("BEGIN").with_header("receipt", "tx"))
        .await;
    let receipt = client.recv().await.expect("expected RECEIPT");
    assert_eq!(receipt.header("receipt-id"), Some("tx"));
}

#[tokio::test]
async fn malformed_destination_errors_but_connection_survives() {
    let (addr, _storage) = start_broker();
    let mut client = TestClient::connect(addr).await;

    client
        .send(
            &Frame::new("SEND")
                .with_header("destination", "/bogus/x")
                .with_body(b"nope".to_vec()),
        )
        .await;
    let error = client.recv().await.expect("expected ERROR");
    assert_eq!(error.command, "ERROR");
    assert_eq!(
        String::from_utf8(error.body.to_vec()).unwrap(),
        "Invalid or missing destination: must be of the form /queue/xxx or /topic/xxx."
    );

    // SEND without any destination header gets the same treatment.
    client.send(&Frame::new("SEND").with_body(b"n".to_vec())).await;
    let error = client.recv().await.expect("expected ERROR");
    assert_eq!(error.command, "ERROR");
}

#[tokio::test]
async fn receipt_still_follows_an_error_reply() {
    let (addr, _storage) = start_broker();
    let mut client = TestClient::connect(addr).await;

    // The receipt wrapper fires after the handler returns, even when the
    // handler answered with ERROR.
    client
        .send(
            &Frame::new("SEND")
                .with_header("destination", "/nowhere")
                .with_header("receipt", "r-err")
                .with_body(b"x".to_vec()),
        )
        .await;

    let error = client.recv().await.expect("expected ERROR");
    assert_eq!(error.command, "ERROR");
    assert_eq!(error.header("receipt-id"), None);

    let receipt = client.recv().await.expect("expected RECEIPT");
    assert_eq!(receipt.command, "RECEIPT");
    assert_eq!(receipt.header("receipt-id"), Some("r-err"));
}

#[tokio::test]
async fn lowercase_commands_are_accepted() {
    let (addr, storage) = start_broker();
    let mut client = TestClient::connect(addr).await;

    client
        .send(
            &Frame::new("send")
                .with_header("destination", "/queue/mixed")
                .with_body(b"lower".to_vec()),
        )
        .await;
    wait_for_rows(&storage, 1).await;
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn disconnect_removes_queue_member_from_rotation() {
    let (addr, _storage) = start_broker();
    let mut consumer_a = TestClient::connect(addr).await;
    let mut consumer_b = TestClient::connect(addr).await;
    let mut publisher = TestClient::connect(addr).await;

    consumer_a.subscribe("/queue/work").await;
    consumer_b.subscribe("/queue/work").await;

    consumer_b.send(&Frame::new("DISCONNECT")).await;
    drop(consumer_b);
    // Give the broker a moment to run the unregister routine.
    sleep(Duration::from_millis(100)).await;

    for body in ["m1", "m2"] {
        publisher.publish("/queue/work", body).await;
    }
    consumer_a.expect_message("/queue/work", "m1").await;
    consumer_a.expect_message("/queue/work", "m2").await;
}
