//! Integration tests for the relay running over the in-memory transport.
//!
//! These exercise the full path: accept loop, registration, reader task,
//! fan-out, writer task and unregistration.

use std::collections::HashMap;
use std::time::Duration;

use relay_core::{BackpressurePolicy, Payload, Relay, RelayConfig};
use relay_transport::memory::{self, MemoryClient, MemoryConnector};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

// ============================================================================
// Test Helpers
// ============================================================================

/// Maximum time to wait for an expected event.
const WAIT: Duration = Duration::from_secs(5);

/// Time after which an absent message is considered not delivered.
const QUIET: Duration = Duration::from_millis(100);

struct TestRelay {
    relay: Relay,
    connector: MemoryConnector,
    server: JoinHandle<()>,
}

impl TestRelay {
    fn spawn(config: RelayConfig) -> Self {
        let relay = Relay::new(config);
        let (transport, connector) = memory::channel(64);
        let server = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.serve(&transport).await })
        };
        Self {
            relay,
            connector,
            server,
        }
    }

    /// Connect a client and wait until the relay has registered it.
    async fn join(&self, buffer: usize) -> MemoryClient {
        let before = self.relay.registry().len();
        let client = self.connector.connect_with_buffer(buffer).await.unwrap();
        self.wait_for_connections(before + 1).await;
        client
    }

    async fn wait_for_connections(&self, expected: usize) {
        timeout(WAIT, async {
            while self.relay.registry().len() != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {expected} connections, have {}",
                self.relay.registry().len()
            )
        });
    }

    async fn shutdown(self) {
        self.relay.shutdown().await;
        timeout(WAIT, self.server).await.unwrap().unwrap();
    }
}

async fn recv_text(client: &mut MemoryClient) -> String {
    let payload = timeout(WAIT, client.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed");
    String::from_utf8(payload.data.to_vec()).unwrap()
}

/// Drain everything that arrives before the line goes quiet.
async fn recv_until_quiet(client: &mut MemoryClient) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(Some(payload)) = timeout(QUIET, client.recv()).await {
        out.push(String::from_utf8(payload.data.to_vec()).unwrap());
    }
    out
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_hello_reaches_peers_exactly_once() {
    let relay = TestRelay::spawn(RelayConfig::default());
    let mut a = relay.join(16).await;
    let mut b = relay.join(16).await;
    let mut c = relay.join(16).await;

    a.send("hello").await.unwrap();

    assert_eq!(recv_text(&mut b).await, "hello");
    assert_eq!(recv_text(&mut c).await, "hello");
    assert!(recv_until_quiet(&mut b).await.is_empty());
    assert!(recv_until_quiet(&mut c).await.is_empty());
    assert!(recv_until_quiet(&mut a).await.is_empty());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_frame_kind_preserved() {
    let relay = TestRelay::spawn(RelayConfig::default());
    let a = relay.join(16).await;
    let mut b = relay.join(16).await;

    a.send(Payload::binary(vec![0u8, 159, 146, 150])).await.unwrap();
    a.send(Payload::text("plain")).await.unwrap();

    let first = timeout(WAIT, b.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, b.recv()).await.unwrap().unwrap();
    assert_eq!(first, Payload::binary(vec![0u8, 159, 146, 150]));
    assert_eq!(second, Payload::text("plain"));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_senders_share_one_order() {
    const SENDERS: usize = 4;
    const PER_SENDER: usize = 50;

    let relay = TestRelay::spawn(RelayConfig {
        queue_capacity: 1024,
        ..Default::default()
    });

    let mut observers = vec![relay.join(1024).await, relay.join(1024).await];
    let mut senders = Vec::new();
    for _ in 0..SENDERS {
        senders.push(relay.join(1024).await);
    }

    let tasks: Vec<_> = senders
        .into_iter()
        .enumerate()
        .map(|(s, client)| {
            tokio::spawn(async move {
                for i in 0..PER_SENDER {
                    client.send(format!("{s}:{i}").into_bytes()).await.unwrap();
                    tokio::task::yield_now().await;
                }
                client
            })
        })
        .collect();

    let mut sequences = Vec::new();
    for observer in &mut observers {
        let mut seq = Vec::new();
        for _ in 0..SENDERS * PER_SENDER {
            seq.push(recv_text(observer).await);
        }
        sequences.push(seq);
    }

    // Both observers saw the same global order
    assert_eq!(sequences[0], sequences[1]);

    // Each sender's messages arrive in send order
    let mut last: HashMap<String, usize> = HashMap::new();
    for entry in &sequences[0] {
        let (sender, index) = entry.split_once(':').unwrap();
        let index: usize = index.parse().unwrap();
        if let Some(prev) = last.insert(sender.to_string(), index) {
            assert!(index > prev, "{entry} arrived after {sender}:{prev}");
        }
    }

    for task in tasks {
        task.await.unwrap();
    }
    relay.shutdown().await;
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_slow_consumer_disconnected_others_unaffected() {
    let relay = TestRelay::spawn(RelayConfig {
        queue_capacity: 2,
        backpressure: BackpressurePolicy::DisconnectSlowConsumer,
        drain_timeout: Duration::from_millis(50),
        ..Default::default()
    });

    let a = relay.join(16).await;
    // B's client never reads and can buffer a single message
    let mut b = relay.join(1).await;
    let mut c = relay.join(16).await;

    for i in 1..=10 {
        a.send(Payload::text(format!("m{i}"))).await.unwrap();
        assert_eq!(recv_text(&mut c).await, format!("m{i}"));
    }

    // B is drained out and unregistered; A and C remain
    relay.wait_for_connections(2).await;
    assert!(relay.relay.stats().broadcast.rejected >= 1);

    // Whatever reached B is an in-order prefix, then the close
    let got = recv_until_quiet(&mut b).await;
    assert!(!got.is_empty() && got.len() < 10);
    for (i, m) in got.iter().enumerate() {
        assert_eq!(m, &format!("m{}", i + 1));
    }
    assert_eq!(b.recv().await, None);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_drop_oldest_keeps_slow_consumer() {
    let relay = TestRelay::spawn(RelayConfig {
        queue_capacity: 2,
        backpressure: BackpressurePolicy::DropOldest,
        ..Default::default()
    });

    let a = relay.join(16).await;
    let mut b = relay.join(1).await;
    let mut c = relay.join(16).await;

    for i in 1..=10 {
        a.send(Payload::text(format!("m{i}"))).await.unwrap();
        assert_eq!(recv_text(&mut c).await, format!("m{i}"));
    }

    assert_eq!(relay.relay.registry().len(), 3);
    assert!(relay.relay.stats().broadcast.dropped > 0);

    // B sees an increasing subsequence that ends with the freshest message
    let got = recv_until_quiet(&mut b).await;
    assert!(got.len() <= 4, "received {got:?}");
    assert_eq!(got.last().map(String::as_str), Some("m10"));
    let numbers: Vec<u32> = got.iter().map(|m| m[1..].parse().unwrap()).collect();
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));

    relay.shutdown().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_disconnect_mid_stream() {
    let relay = TestRelay::spawn(RelayConfig::default());
    let mut a = relay.join(16).await;
    let mut b = relay.join(16).await;
    let mut c = relay.join(16).await;

    a.send("last words").await.unwrap();
    a.disconnect();

    assert_eq!(recv_text(&mut b).await, "last words");
    assert_eq!(recv_text(&mut c).await, "last words");
    relay.wait_for_connections(2).await;
    assert_eq!(a.recv().await, None);

    // The remaining peers keep talking
    b.send("still here").await.unwrap();
    assert_eq!(recv_text(&mut c).await, "still here");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_registry_empties_after_churn() {
    let relay = TestRelay::spawn(RelayConfig::default());
    let anchor = relay.join(64).await;

    for round in 0..20 {
        let mut client = relay.join(64).await;
        anchor.send(Payload::text(format!("round {round}"))).await.unwrap();
        assert_eq!(recv_text(&mut client).await, format!("round {round}"));
        client.disconnect();
        relay.wait_for_connections(1).await;
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_everyone() {
    let relay = TestRelay::spawn(RelayConfig::default());
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(relay.join(16).await);
    }

    let handle = relay.relay.clone();
    relay.shutdown().await;

    assert!(handle.registry().is_empty());
    assert!(handle.is_shutting_down());
    for client in &mut clients {
        assert_eq!(timeout(WAIT, client.recv()).await.unwrap(), None);
    }
}
