//! Transport abstraction traits for Relay.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the relay core to be transport-agnostic. A transport hands the core one
//! [`TransportConnection`] per established client, already split into an inbound
//! half and an outbound half so reads and writes can be driven by independent tasks.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Default limit on the size of one inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KB

/// Framing kind of a payload as seen by the transport.
///
/// The relay never inspects payload bytes; the kind only lets a WebSocket
/// transport forward a text frame as text and a binary frame as binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PayloadKind {
    /// UTF-8 text frame.
    Text,
    /// Binary frame.
    #[default]
    Binary,
}

/// One opaque message as carried by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Frame kind.
    pub kind: PayloadKind,
    /// Message bytes (shared for zero-copy fan-out).
    pub data: Bytes,
}

impl Payload {
    /// Create a binary payload.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            kind: PayloadKind::Binary,
            data: data.into(),
        }
    }

    /// Create a text payload.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Text,
            data: Bytes::from(text.into()),
        }
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Self {
            kind: PayloadKind::Text,
            data: Bytes::from_static(s.as_bytes()),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::binary(v)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Self::binary(b)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeds the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size of the rejected message.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// The protocol handshake with a new client failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the connection can keep reading after this error.
    ///
    /// Only an oversized inbound message is recoverable: the message is
    /// discarded and the connection stays open.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::MessageTooLarge { .. })
    }
}

/// A transport that can accept connections.
///
/// Transports are responsible for handling the underlying protocol
/// (WebSocket handshake, framing) and providing a uniform interface.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// Suspends until a new connection is available or an error occurs.
    /// [`TransportError::ConnectionClosed`] means the transport itself has shut down.
    async fn accept(&self) -> Result<TransportConnection, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// Inbound half of a client connection.
#[async_trait]
pub trait MessageReader: Send {
    /// Receive the next message.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Payload>, TransportError>;
}

/// Outbound half of a client connection.
#[async_trait]
pub trait MessageWriter: Send {
    /// Send one message.
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An established client connection, split into independently owned halves.
pub struct TransportConnection {
    /// Inbound half.
    pub reader: Box<dyn MessageReader>,
    /// Outbound half.
    pub writer: Box<dyn MessageWriter>,
    /// Remote address, if known.
    pub remote_addr: Option<String>,
}

impl TransportConnection {
    /// Create a connection from its two halves.
    #[must_use]
    pub fn new(reader: impl MessageReader + 'static, writer: impl MessageWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            remote_addr: None,
        }
    }

    /// Attach the remote address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConnection")
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}
