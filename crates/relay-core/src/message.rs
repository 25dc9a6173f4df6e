//! Internal message types for Relay.

use crate::connection::ConnectionId;
use relay_transport::Payload;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// A unique message identifier.
pub type MessageId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A message travelling through the relay.
///
/// The origin is only used to exclude the sender from fan-out; peers receive
/// the payload alone.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Connection that sent the message.
    pub origin: ConnectionId,
    /// Opaque payload, forwarded verbatim.
    pub payload: Payload,
    /// When the relay received the message.
    pub received_at: Instant,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(origin: ConnectionId, payload: impl Into<Payload>) -> Self {
        Self {
            id: generate_message_id(),
            origin,
            payload: payload.into(),
            received_at: Instant::now(),
        }
    }

    /// Get the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let origin = ConnectionId::from_raw(7);
        let msg = Message::new(origin, "hello");
        assert_eq!(msg.origin, origin);
        assert_eq!(msg.payload(), b"hello");
        assert_eq!(msg.payload_size(), 5);
    }

    #[test]
    fn test_unique_message_ids() {
        let id1 = generate_message_id();
        let id2 = generate_message_id();
        assert!(id2 > id1);
    }
}
