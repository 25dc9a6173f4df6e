//! Adapter for WebSockets upgraded by axum.
//!
//! When the relay is mounted on an HTTP router, axum performs the accept and
//! the upgrade; this module turns the upgraded socket into a [`TransportConnection`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{
    MessageReader, MessageWriter, Payload, PayloadKind, TransportConnection, TransportError,
};

/// Wrap an upgraded axum WebSocket.
#[must_use]
pub fn into_connection(
    socket: WebSocket,
    remote_addr: Option<String>,
    max_message_size: usize,
) -> TransportConnection {
    let (sink, stream) = socket.split();
    TransportConnection {
        reader: Box::new(AxumReader {
            stream,
            max_message_size,
        }),
        writer: Box::new(AxumWriter { sink, open: true }),
        remote_addr,
    }
}

struct AxumReader {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl MessageReader for AxumReader {
    async fn recv(&mut self) -> Result<Option<Payload>, TransportError> {
        loop {
            let payload = match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => Payload::binary(data),
                Some(Ok(Message::Text(text))) => Payload::text(text),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Ok(None),
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

struct AxumWriter {
    sink: SplitSink<WebSocket, Message>,
    open: bool,
}

#[async_trait]
impl MessageWriter for AxumWriter {
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match payload.kind {
            PayloadKind::Text => match String::from_utf8(payload.data.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            PayloadKind::Binary => Message::Binary(payload.data.to_vec()),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(());
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
