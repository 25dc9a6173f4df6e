//! # relay-core
//!
//! Connection registry and broadcast fan-out for the Relay engine.
//!
//! Every message a client sends is forwarded verbatim to every other
//! connected client. This crate provides the building blocks:
//!
//! - **Connection** - Lifecycle state and a bounded outbound queue
//! - **Registry** - The set of live connections, with snapshot reads
//! - **Broadcaster** - Ordered, backpressure-aware fan-out
//! - **Relay** - Accept loop and per-connection reader/writer tasks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│    Relay    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   ▲
//!                            ▼                   │ snapshot
//!                     ┌─────────────┐            │
//!                     │ Broadcaster │────────────┘
//!                     └─────────────┘
//!                            │ enqueue
//!                            ▼
//!                     ┌─────────────┐
//!                     │ Connection  │──▶ writer task ──▶ transport
//!                     └─────────────┘
//! ```

pub mod broadcaster;
pub mod connection;
pub mod error;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod relay;

pub use broadcaster::{BroadcastStats, Broadcaster, FanoutReport};
pub use connection::{
    BackpressurePolicy, Connection, ConnectionId, ConnectionState, Enqueued, QueueConfig,
};
pub use error::RelayError;
pub use message::{Message, MessageId};
pub use registry::Registry;
pub use relay::{Relay, RelayConfig, RelayStats};
pub use relay_transport::{Payload, PayloadKind, DEFAULT_MAX_MESSAGE_SIZE};
