//! Shared fixtures for the Relay benchmarks.

use bytes::Bytes;
use relay_core::{
    BackpressurePolicy, Broadcaster, Connection, ConnectionId, QueueConfig, Registry, Relay,
};
use relay_transport::memory::{self, MemoryClient, MemoryConnector};
use std::sync::Arc;
use std::time::Duration;

/// A registry of connections with a broadcaster over it.
pub struct Fixture {
    /// Registered connections.
    pub registry: Arc<Registry>,
    /// Broadcaster over the registry.
    pub broadcaster: Broadcaster,
    /// Connection used as the origin of benchmarked messages.
    pub origin: ConnectionId,
    /// Every other connection.
    pub peers: Vec<Arc<Connection>>,
}

/// Build a registry with one origin and `width` peers.
///
/// # Panics
///
/// Panics if `width` exceeds the default connection limit.
#[must_use]
pub fn fixture(width: usize, capacity: usize, policy: BackpressurePolicy) -> Fixture {
    let config = QueueConfig {
        capacity,
        policy,
        drain_timeout: Duration::from_secs(5),
    };
    let registry = Arc::new(Registry::new());

    let origin = Arc::new(Connection::new(ConnectionId::generate(), config.clone()));
    registry.add(Arc::clone(&origin)).expect("registry has room");

    let peers = (0..width)
        .map(|_| {
            let peer = Arc::new(Connection::new(ConnectionId::generate(), config.clone()));
            registry.add(Arc::clone(&peer)).expect("registry has room");
            peer
        })
        .collect();

    Fixture {
        broadcaster: Broadcaster::new(Arc::clone(&registry)),
        registry,
        origin: origin.id(),
        peers,
    }
}

/// A zeroed payload of `size` bytes.
#[must_use]
pub fn payload(size: usize) -> Bytes {
    Bytes::from(vec![0u8; size])
}

/// A relay serving the in-memory transport with `clients` connected clients.
///
/// Returns once every client is registered.
///
/// # Panics
///
/// Panics if a client cannot connect.
pub async fn memory_relay(
    clients: usize,
    relay: Relay,
) -> (Relay, MemoryConnector, Vec<MemoryClient>) {
    let (transport, connector) = memory::channel(clients.max(1));
    {
        let relay = relay.clone();
        tokio::spawn(async move { relay.serve(&transport).await });
    }

    let mut connected = Vec::with_capacity(clients);
    for _ in 0..clients {
        connected.push(connector.connect().await.expect("transport is open"));
    }
    while relay.registry().len() < clients {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    (relay, connector, connected)
}
