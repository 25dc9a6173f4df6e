//! Metric names recorded by the relay core.
//!
//! The core only records through the `metrics` facade; installing an
//! exporter is left to the binary.

pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
pub const CONNECTIONS_REJECTED: &str = "relay_connections_rejected_total";
pub const MESSAGES_INBOUND: &str = "relay_messages_inbound_total";
pub const MESSAGES_BYTES: &str = "relay_messages_inbound_bytes";
pub const MESSAGES_OVERSIZED: &str = "relay_messages_oversized_total";
pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
pub const DROPPED_OLDEST: &str = "relay_dropped_oldest_total";
pub const SLOW_CONSUMERS: &str = "relay_slow_consumer_disconnects_total";
pub const TRANSPORT_ERRORS: &str = "relay_transport_errors_total";
pub const FANOUT_SECONDS: &str = "relay_fanout_seconds";
