//! WebSocket transport implementation.
//!
//! This module provides a standalone WebSocket listener using tokio-tungstenite.
//! It accepts upgrades on any request path, which is the dedicated-port deployment
//! of the relay.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::traits::{
    MessageReader, MessageWriter, Payload, PayloadKind, Transport, TransportConnection,
    TransportError, DEFAULT_MAX_MESSAGE_SIZE,
};

/// Default time a client gets to complete the WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshaken connections waiting for [`Transport::accept`].
const READY_BACKLOG: usize = 128;

type Handshaken = Result<TransportConnection, TransportError>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Time a client gets to complete the upgrade before it is dropped.
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// WebSocket transport.
///
/// A background task accepts TCP connections and runs every handshake in its
/// own task, so a client that stalls mid-upgrade never holds up the others.
/// [`Transport::accept`] hands out connections in the order their handshakes
/// complete.
pub struct WebSocketTransport {
    local_addr: SocketAddr,
    ready: Mutex<mpsc::Receiver<Handshaken>>,
    acceptor: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", local_addr);

        let (tx, rx) = mpsc::channel(READY_BACKLOG);
        let acceptor = tokio::spawn(accept_loop(listener, config, tx));

        Ok(Self {
            local_addr,
            ready: Mutex::new(rx),
            acceptor,
        })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<TransportConnection, TransportError> {
        self.ready
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(TransportError::ConnectionClosed))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: WebSocketConfig,
    ready: mpsc::Sender<Handshaken>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Listener-level failure; the accepting side decides how to back off
                if ready.send(Err(TransportError::Io(e))).await.is_err() {
                    break;
                }
                continue;
            }
        };

        debug!("Accepted TCP connection from {}", addr);

        let ready = ready.clone();
        let handshake_timeout = config.handshake_timeout;
        let max_message_size = config.max_message_size;
        tokio::spawn(async move {
            let result = handshake(stream, addr, handshake_timeout, max_message_size).await;
            // Nobody is accepting any more; the connection is dropped
            let _ = ready.send(result).await;
        });
    }
}

async fn handshake(
    stream: TcpStream,
    addr: SocketAddr,
    handshake_timeout: Duration,
    max_message_size: usize,
) -> Handshaken {
    let ws_stream = match tokio::time::timeout(handshake_timeout, accept_async(stream)).await {
        Ok(Ok(ws_stream)) => ws_stream,
        Ok(Err(e)) => return Err(TransportError::Handshake(format!("{}: {}", addr, e))),
        Err(_) => {
            return Err(TransportError::Handshake(format!(
                "{}: timed out after {:?}",
                addr, handshake_timeout
            )))
        }
    };

    debug!("WebSocket handshake completed with {}", addr);

    Ok(split_stream(ws_stream, addr, max_message_size))
}

/// Split an upgraded stream into relay connection halves.
fn split_stream(
    stream: WebSocketStream<TcpStream>,
    remote_addr: SocketAddr,
    max_message_size: usize,
) -> TransportConnection {
    let (sink, stream) = stream.split();
    TransportConnection::new(
        WebSocketReader {
            stream,
            max_message_size,
        },
        WebSocketWriter { sink, open: true },
    )
    .with_remote_addr(remote_addr.to_string())
}

/// Inbound half of a WebSocket connection.
pub struct WebSocketReader {
    stream: SplitStream<WebSocketStream<TcpStream>>,
    max_message_size: usize,
}

#[async_trait]
impl MessageReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Payload>, TransportError> {
        loop {
            let payload = match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => Payload::binary(data),
                Some(Ok(Message::Text(text))) => Payload::text(text),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Control frames are answered by tungstenite itself
                    continue;
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            };

            if payload.len() > self.max_message_size {
                warn!(
                    "Message too large: {} bytes (max: {})",
                    payload.len(),
                    self.max_message_size
                );
                return Err(TransportError::MessageTooLarge {
                    size: payload.len(),
                    max: self.max_message_size,
                });
            }

            return Ok(Some(payload));
        }
    }
}

/// Outbound half of a WebSocket connection.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    open: bool,
}

#[async_trait]
impl MessageWriter for WebSocketWriter {
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        self.sink
            .send(into_ws_message(payload))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(()); // Already closed
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}

fn into_ws_message(payload: Payload) -> Message {
    match payload.kind {
        PayloadKind::Text => match String::from_utf8(payload.data.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        },
        PayloadKind::Binary => Message::Binary(payload.data.to_vec()),
    }
}
