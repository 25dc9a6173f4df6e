//! Error types for the relay core.

use crate::connection::ConnectionId;
use thiserror::Error;

/// Relay errors.
///
/// All of these are contained to the connection they name; none of them
/// aborts the broadcaster or other connections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// A connection with this identity is already registered.
    #[error("Duplicate connection identity: {0}")]
    DuplicateIdentity(ConnectionId),

    /// The recipient's outbound queue is full or draining.
    #[error("Outbound queue full for {0}")]
    Backpressure(ConnectionId),

    /// The connection has already been closed.
    #[error("Connection already closed: {0}")]
    ClosedConnection(ConnectionId),

    /// The registry holds the maximum number of connections.
    #[error("Maximum connections reached ({0})")]
    RegistryFull(usize),

    /// The relay is shutting down and accepts no new connections.
    #[error("Relay is shutting down")]
    ShuttingDown,
}
