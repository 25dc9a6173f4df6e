//! Connections and their bounded outbound queues.
//!
//! A connection moves through `Active → Draining → Closed`, or straight from
//! `Active` to `Closed` when its transport fails. The outbound queue is shared
//! by exactly two actors: the broadcaster enqueues, the connection's writer
//! task dequeues.

use crate::error::RelayError;
use crate::message::Message;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Default outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default time a draining connection gets to flush its queue.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an identifier from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepting reads and outbound enqueues.
    Active,
    /// Rejecting enqueues while the queued messages flush.
    Draining,
    /// Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Active => "active",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What happens when a message arrives for a full outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackpressurePolicy {
    /// Evict the oldest queued message and keep the connection.
    #[serde(rename = "drop-oldest")]
    DropOldest,
    /// Refuse the message and start draining the connection.
    #[default]
    #[serde(rename = "disconnect")]
    DisconnectSlowConsumer,
}

/// Outbound queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of queued messages.
    pub capacity: usize,
    /// Policy applied once the queue is full.
    pub policy: BackpressurePolicy,
    /// How long a draining connection may take to flush.
    pub drain_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            policy: BackpressurePolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Successful enqueue outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The message was appended.
    Queued,
    /// The message was appended after evicting the oldest one.
    DroppedOldest,
}

struct Outbound {
    state: ConnectionState,
    queue: VecDeque<Arc<Message>>,
    drain_deadline: Option<Instant>,
}

/// One attached client.
pub struct Connection {
    id: ConnectionId,
    remote_addr: Option<String>,
    config: QueueConfig,
    outbound: Mutex<Outbound>,
    /// Wakes the writer task on enqueue and on state changes.
    ready: Notify,
    state_tx: watch::Sender<ConnectionState>,
    dropped: AtomicU64,
}

impl Connection {
    /// Create an `Active` connection.
    #[must_use]
    pub fn new(id: ConnectionId, mut config: QueueConfig) -> Self {
        config.capacity = config.capacity.max(1);
        let (state_tx, _) = watch::channel(ConnectionState::Active);
        Self {
            id,
            remote_addr: None,
            outbound: Mutex::new(Outbound {
                state: ConnectionState::Active,
                queue: VecDeque::with_capacity(config.capacity.min(DEFAULT_QUEUE_CAPACITY)),
                drain_deadline: None,
            }),
            config,
            ready: Notify::new(),
            state_tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach the peer address, for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: Option<String>) -> Self {
        self.remote_addr = addr;
        self
    }

    /// Get the connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.outbound.lock().state
    }

    /// Whether the connection accepts new messages.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Number of messages waiting to be written.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.outbound.lock().queue.len()
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Number of messages evicted by the drop-oldest policy.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Append a message to the outbound queue, applying the backpressure policy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Backpressure`] if the queue is full under the
    /// disconnect policy or the connection is already draining, and
    /// [`RelayError::ClosedConnection`] if it is closed.
    pub fn enqueue(&self, message: Arc<Message>) -> Result<Enqueued, RelayError> {
        let mut out = self.outbound.lock();

        match out.state {
            ConnectionState::Closed => return Err(RelayError::ClosedConnection(self.id)),
            ConnectionState::Draining => return Err(RelayError::Backpressure(self.id)),
            ConnectionState::Active => {}
        }

        let outcome = if out.queue.len() < self.config.capacity {
            Enqueued::Queued
        } else {
            match self.config.policy {
                BackpressurePolicy::DropOldest => {
                    out.queue.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Enqueued::DroppedOldest
                }
                BackpressurePolicy::DisconnectSlowConsumer => {
                    out.drain_deadline = Some(Instant::now() + self.config.drain_timeout);
                    self.set_state(&mut out, ConnectionState::Draining);
                    let queued = out.queue.len();
                    drop(out);
                    self.ready.notify_one();

                    warn!(
                        connection = %self.id,
                        queued,
                        "Outbound queue full, draining slow consumer"
                    );
                    return Err(RelayError::Backpressure(self.id));
                }
            }
        };

        out.queue.push_back(message);
        drop(out);
        self.ready.notify_one();

        Ok(outcome)
    }

    /// Wait for the next message to write.
    ///
    /// Returns `None` once the connection is closed. A draining connection
    /// whose queue has emptied is closed here.
    pub async fn next_outbound(&self) -> Option<Arc<Message>> {
        loop {
            {
                let mut out = self.outbound.lock();
                if out.state == ConnectionState::Closed {
                    return None;
                }
                if let Some(message) = out.queue.pop_front() {
                    return Some(message);
                }
                if out.state == ConnectionState::Draining {
                    self.set_state(&mut out, ConnectionState::Closed);
                    debug!(connection = %self.id, "Drained");
                    return None;
                }
            }

            self.ready.notified().await;
        }
    }

    /// Close the connection and discard anything still queued.
    ///
    /// Returns `true` if this call performed the transition; closing an
    /// already closed connection is a no-op.
    pub fn close(&self) -> bool {
        let mut out = self.outbound.lock();
        if out.state == ConnectionState::Closed {
            return false;
        }

        let discarded = out.queue.len();
        out.queue.clear();
        self.set_state(&mut out, ConnectionState::Closed);
        drop(out);
        self.ready.notify_one();

        debug!(connection = %self.id, discarded, "Connection closed");
        true
    }

    /// Resolve once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Resolve once an in-flight write must be abandoned: the connection is
    /// closed, or it is draining and its drain deadline has passed.
    pub async fn abandon_signal(&self) {
        let mut rx = self.state_tx.subscribe();
        let state = match rx.wait_for(|s| *s != ConnectionState::Active).await {
            Ok(state) => *state,
            Err(_) => return,
        };

        if state == ConnectionState::Draining {
            let deadline = self.outbound.lock().drain_deadline;
            if let Some(deadline) = deadline {
                tokio::select! {
                    () = sleep_until(deadline) => {
                        warn!(connection = %self.id, "Drain timed out");
                    }
                    () = self.closed() => {}
                }
            }
        }
    }

    fn set_state(&self, out: &mut Outbound, state: ConnectionState) {
        out.state = state;
        self.state_tx.send_replace(state);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let out = self.outbound.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &out.state)
            .field("queued", &out.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(capacity: usize, policy: BackpressurePolicy) -> Connection {
        Connection::new(
            ConnectionId::generate(),
            QueueConfig {
                capacity,
                policy,
                drain_timeout: Duration::from_millis(100),
            },
        )
    }

    fn msg(text: &'static str) -> Arc<Message> {
        Arc::new(Message::new(ConnectionId::from_raw(0), text))
    }

    async fn drain_now(c: &Connection) -> Vec<String> {
        let mut out = Vec::new();
        while c.queue_len() > 0 {
            let m = c.next_outbound().await.unwrap();
            out.push(String::from_utf8(m.payload().to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn test_connection_id_display_and_uniqueness() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert_eq!(ConnectionId::from_raw(42).to_string(), "conn-42");
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let c = conn(8, BackpressurePolicy::DisconnectSlowConsumer);
        for m in ["m1", "m2", "m3"] {
            assert_eq!(c.enqueue(msg(m)).unwrap(), Enqueued::Queued);
        }
        assert_eq!(drain_now(&c).await, vec!["m1", "m2", "m3"]);
        assert_eq!(c.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest() {
        let c = conn(2, BackpressurePolicy::DropOldest);
        c.enqueue(msg("m1")).unwrap();
        c.enqueue(msg("m2")).unwrap();
        assert_eq!(c.enqueue(msg("m3")).unwrap(), Enqueued::DroppedOldest);

        assert_eq!(c.dropped(), 1);
        assert!(c.is_active());
        assert_eq!(drain_now(&c).await, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_disconnect_policy_drains_then_closes() {
        let c = conn(2, BackpressurePolicy::DisconnectSlowConsumer);
        c.enqueue(msg("m1")).unwrap();
        c.enqueue(msg("m2")).unwrap();

        assert_eq!(c.enqueue(msg("m3")), Err(RelayError::Backpressure(c.id())));
        assert_eq!(c.state(), ConnectionState::Draining);
        // Draining refuses everything new
        assert_eq!(c.enqueue(msg("m4")), Err(RelayError::Backpressure(c.id())));

        // Queued messages still flush, then the connection closes
        assert_eq!(c.next_outbound().await.unwrap().payload(), b"m1");
        assert_eq!(c.next_outbound().await.unwrap().payload(), b"m2");
        assert!(c.next_outbound().await.is_none());
        assert_eq!(c.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let c = conn(4, BackpressurePolicy::DisconnectSlowConsumer);
        c.enqueue(msg("m1")).unwrap();

        assert!(c.close());
        assert!(!c.close());
        assert_eq!(c.queue_len(), 0);
        assert_eq!(c.enqueue(msg("m2")), Err(RelayError::ClosedConnection(c.id())));
        assert!(c.next_outbound().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_wakes_on_enqueue() {
        let c = Arc::new(conn(4, BackpressurePolicy::DisconnectSlowConsumer));
        let writer = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.next_outbound().await })
        };

        tokio::task::yield_now().await;
        c.enqueue(msg("late")).unwrap();

        let got = writer.await.unwrap().unwrap();
        assert_eq!(got.payload(), b"late");
    }

    #[tokio::test]
    async fn test_writer_wakes_on_close() {
        let c = Arc::new(conn(4, BackpressurePolicy::DisconnectSlowConsumer));
        let writer = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.next_outbound().await })
        };

        tokio::task::yield_now().await;
        c.close();

        assert!(writer.await.unwrap().is_none());
        c.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_after_drain_timeout() {
        let c = conn(1, BackpressurePolicy::DisconnectSlowConsumer);
        c.enqueue(msg("m1")).unwrap();
        assert!(c.enqueue(msg("m2")).is_err());

        let started = Instant::now();
        c.abandon_signal().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        // The queue was never flushed; the caller decides to close
        assert_eq!(c.state(), ConnectionState::Draining);
    }

    #[tokio::test]
    async fn test_abandon_immediately_when_closed() {
        let c = conn(1, BackpressurePolicy::DisconnectSlowConsumer);
        c.close();
        c.abandon_signal().await;
    }
}
