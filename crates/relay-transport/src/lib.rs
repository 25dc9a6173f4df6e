//! # relay-transport
//!
//! Transport abstraction layer for the Relay broadcast engine.
//!
//! This crate provides a unified interface for the ways clients reach the relay:
//!
//! - **WebSocket** - Standalone tokio-tungstenite listener
//! - **Axum** - WebSockets upgraded by an axum HTTP router
//! - **Memory** - Channel-backed connections for tests and benchmarks
//!
//! ## Transport Abstraction
//!
//! Every transport produces [`TransportConnection`]s split into a
//! [`MessageReader`] and a [`MessageWriter`], so the relay can read and write
//! each client from independent tasks.
//!
//! ```rust,ignore
//! use relay_transport::{Transport, TransportConnection};
//!
//! async fn handle(mut conn: TransportConnection) {
//!     while let Ok(Some(payload)) = conn.reader.recv().await {
//!         // Process payload
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "axum")]
pub mod axum_ws;

pub use traits::{
    MessageReader, MessageWriter, Payload, PayloadKind, Transport, TransportConnection,
    TransportError, DEFAULT_MAX_MESSAGE_SIZE,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
