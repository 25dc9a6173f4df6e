//! The relay: accept loop and per-connection lifecycles.
//!
//! Every attached connection gets two tasks. The reader forwards inbound
//! messages to the broadcaster; the writer drains the outbound queue into the
//! transport. Whichever ends first closes the connection, which stops the
//! other, and both unregister it.

use crate::broadcaster::{BroadcastStats, Broadcaster};
use crate::connection::{BackpressurePolicy, Connection, ConnectionId, QueueConfig};
use crate::error::RelayError;
use crate::message::Message;
use crate::metrics as names;
use crate::registry::Registry;
use metrics::counter;
use relay_transport::{
    MessageReader, MessageWriter, Transport, TransportConnection, TransportError,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Pause after a listener-level accept failure (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Policy applied when a queue is full.
    pub backpressure: BackpressurePolicy,
    /// Time a draining connection gets to flush; also bounds the final transport close.
    pub drain_timeout: Duration,
    /// Maximum number of connections.
    pub max_connections: usize,
    /// Inbound messages larger than this are discarded.
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            queue_capacity: queue.capacity,
            backpressure: queue.policy,
            drain_timeout: queue.drain_timeout,
            max_connections: crate::registry::DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl RelayConfig {
    fn queue(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            policy: self.backpressure,
            drain_timeout: self.drain_timeout,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Currently registered connections.
    pub connections: usize,
    /// Broadcaster counters.
    pub broadcast: BroadcastStats,
}

struct Shared {
    config: RelayConfig,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// A running relay. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Relay {
    shared: Arc<Shared>,
}

impl Relay {
    /// Create a relay with custom configuration.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        info!("Creating relay with config: {:?}", config);
        let registry = Arc::new(Registry::with_limit(config.max_connections));
        Self {
            shared: Arc::new(Shared {
                broadcaster: Broadcaster::new(Arc::clone(&registry)),
                registry,
                config,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Get the relay configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    /// Get the connection registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Get the broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.shared.broadcaster
    }

    /// Get relay statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.shared.registry.len(),
            broadcast: self.shared.broadcaster.stats(),
        }
    }

    /// Whether [`Relay::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Register an established transport connection and start its reader and writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry refuses the connection or the relay is
    /// shutting down. The transport is dropped, which closes it.
    pub fn attach(&self, transport: TransportConnection) -> Result<ConnectionId, RelayError> {
        if self.is_shutting_down() {
            counter!(names::CONNECTIONS_REJECTED).increment(1);
            return Err(RelayError::ShuttingDown);
        }

        let TransportConnection {
            reader,
            writer,
            remote_addr,
        } = transport;

        let id = ConnectionId::generate();
        let conn = Arc::new(
            Connection::new(id, self.shared.config.queue()).with_remote_addr(remote_addr),
        );

        if let Err(e) = self.shared.registry.add(Arc::clone(&conn)) {
            warn!(connection = %id, error = %e, "Rejected connection");
            counter!(names::CONNECTIONS_REJECTED).increment(1);
            return Err(e);
        }

        // Shutdown may have snapshotted the registry before this insert
        if self.is_shutting_down() {
            conn.close();
            self.shared.registry.remove(id);
            counter!(names::CONNECTIONS_REJECTED).increment(1);
            return Err(RelayError::ShuttingDown);
        }

        counter!(names::CONNECTIONS_TOTAL).increment(1);
        debug!(
            connection = %id,
            remote = conn.remote_addr().unwrap_or("unknown"),
            "Connection attached"
        );

        self.shared
            .tasks
            .spawn(read_loop(self.clone(), Arc::clone(&conn), reader));
        self.shared.tasks.spawn(write_loop(self.clone(), conn, writer));

        Ok(id)
    }

    /// Accept connections from `transport` until it is exhausted or the relay shuts down.
    pub async fn serve<T>(&self, transport: &T)
    where
        T: Transport + ?Sized,
    {
        info!(transport = transport.name(), "Accept loop started");

        loop {
            let accepted = tokio::select! {
                () = self.shared.shutdown.cancelled() => break,
                accepted = transport.accept() => accepted,
            };

            match accepted {
                Ok(conn) => {
                    // Rejections are logged and counted by attach
                    let _ = self.attach(conn);
                }
                Err(TransportError::ConnectionClosed) => {
                    info!(transport = transport.name(), "Transport closed");
                    break;
                }
                Err(TransportError::Io(e)) => {
                    warn!(error = %e, "Accept failed");
                    counter!(names::TRANSPORT_ERRORS, "stage" => "accept").increment(1);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                Err(e) => {
                    debug!(error = %e, "Connection setup failed");
                    counter!(names::TRANSPORT_ERRORS, "stage" => "handshake").increment(1);
                }
            }
        }

        info!(transport = transport.name(), "Accept loop stopped");
    }

    /// Stop accepting, close every connection and wait for all connection tasks.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();

        let connections = self.shared.registry.snapshot();
        info!(connections = connections.len(), "Shutting down relay");
        for conn in &connections {
            conn.close();
        }

        self.shared.tasks.close();
        self.shared.tasks.wait().await;

        info!("Relay shut down");
    }

    fn release(&self, conn: &Connection) {
        conn.close();
        if self.shared.registry.remove(conn.id()).is_some() {
            debug!(connection = %conn.id(), "Connection detached");
        }
    }
}

async fn read_loop(relay: Relay, conn: Arc<Connection>, mut reader: Box<dyn MessageReader>) {
    let max_message_size = relay.shared.config.max_message_size;

    loop {
        let next = tokio::select! {
            () = conn.closed() => break,
            next = reader.recv() => next,
        };

        match next {
            Ok(Some(payload)) => {
                if payload.len() > max_message_size {
                    warn!(
                        connection = %conn.id(),
                        size = payload.len(),
                        max = max_message_size,
                        "Discarding oversized message"
                    );
                    counter!(names::MESSAGES_OVERSIZED).increment(1);
                    continue;
                }

                counter!(names::MESSAGES_INBOUND).increment(1);
                counter!(names::MESSAGES_BYTES).increment(payload.len() as u64);
                relay
                    .shared
                    .broadcaster
                    .fanout(Message::new(conn.id(), payload));
            }
            Ok(None) => {
                debug!(connection = %conn.id(), "Closed by peer");
                break;
            }
            Err(e) if e.is_recoverable() => {
                warn!(connection = %conn.id(), error = %e, "Discarding inbound message");
                counter!(names::MESSAGES_OVERSIZED).increment(1);
            }
            Err(e) => {
                warn!(connection = %conn.id(), error = %e, "Read failed");
                counter!(names::TRANSPORT_ERRORS, "stage" => "read").increment(1);
                break;
            }
        }
    }

    relay.release(&conn);
}

async fn write_loop(relay: Relay, conn: Arc<Connection>, mut writer: Box<dyn MessageWriter>) {
    while let Some(message) = conn.next_outbound().await {
        let sent = tokio::select! {
            biased;
            () = conn.abandon_signal() => {
                debug!(connection = %conn.id(), "Abandoning pending write");
                break;
            }
            sent = writer.send(message.payload.clone()) => sent,
        };

        if let Err(e) = sent {
            warn!(connection = %conn.id(), error = %e, "Write failed");
            counter!(names::TRANSPORT_ERRORS, "stage" => "write").increment(1);
            break;
        }
    }

    relay.release(&conn);

    match tokio::time::timeout(relay.shared.config.drain_timeout, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(connection = %conn.id(), error = %e, "Transport close failed"),
        Err(_) => debug!(connection = %conn.id(), "Transport close timed out"),
    }
}
