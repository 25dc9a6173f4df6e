//! In-memory transport.
//!
//! Connects clients to a relay through bounded tokio channels instead of sockets.
//! Used by tests and benchmarks. The bounded server-to-client buffer models a
//! client that stops reading: once it is full, the server-side write suspends
//! exactly as a stalled socket write would.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::traits::{
    MessageReader, MessageWriter, Payload, Transport, TransportConnection, TransportError,
};

/// Default number of in-flight messages per direction.
pub const DEFAULT_BUFFER: usize = 1024;

/// Create a connected transport/connector pair.
///
/// `backlog` bounds the number of connections waiting to be accepted.
#[must_use]
pub fn channel(backlog: usize) -> (MemoryTransport, MemoryConnector) {
    let (tx, rx) = mpsc::channel(backlog.max(1));
    (
        MemoryTransport {
            incoming: Mutex::new(rx),
        },
        MemoryConnector { pending: tx },
    )
}

/// Accepting side of the in-memory transport.
pub struct MemoryTransport {
    incoming: Mutex<mpsc::Receiver<TransportConnection>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept(&self) -> Result<TransportConnection, TransportError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Connecting side of the in-memory transport.
#[derive(Clone)]
pub struct MemoryConnector {
    pending: mpsc::Sender<TransportConnection>,
}

impl MemoryConnector {
    /// Connect a client with the default delivery buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has been dropped.
    pub async fn connect(&self) -> Result<MemoryClient, TransportError> {
        self.connect_with_buffer(DEFAULT_BUFFER).await
    }

    /// Connect a client whose server-to-client buffer holds `buffer` messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has been dropped.
    pub async fn connect_with_buffer(&self, buffer: usize) -> Result<MemoryClient, TransportError> {
        let (conn, client) = pair(buffer);
        self.pending
            .send(conn)
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(client)
    }
}

/// Create a server-side connection and the client that talks to it.
#[must_use]
pub fn pair(buffer: usize) -> (TransportConnection, MemoryClient) {
    let (to_server, from_client) = mpsc::channel(DEFAULT_BUFFER);
    let (to_client, from_server) = mpsc::channel(buffer.max(1));

    let conn = TransportConnection::new(
        MemoryReader { rx: from_client },
        MemoryWriter {
            tx: Some(to_client),
        },
    )
    .with_remote_addr("memory");

    let client = MemoryClient {
        tx: Some(to_server),
        rx: from_server,
    };

    (conn, client)
}

struct MemoryReader {
    rx: mpsc::Receiver<Payload>,
}

#[async_trait]
impl MessageReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Payload>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

struct MemoryWriter {
    tx: Option<mpsc::Sender<Payload>>,
}

#[async_trait]
impl MessageWriter for MemoryWriter {
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(payload)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

/// The client end of an in-memory connection.
pub struct MemoryClient {
    tx: Option<mpsc::Sender<Payload>>,
    rx: mpsc::Receiver<Payload>,
}

impl MemoryClient {
    /// Send a message to the relay.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has disconnected or the server side is gone.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(payload.into())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next message delivered by the relay.
    ///
    /// Returns `None` once the server has closed the connection.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    /// Receive a message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }

    /// Disconnect the client side; the server reader observes a clean close.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }
}
