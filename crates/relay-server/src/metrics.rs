//! Metrics export for the relay server.
//!
//! The core records through the `metrics` facade; this module installs the
//! Prometheus exporter and describes those metrics to it.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_core::metrics as names;
use std::net::SocketAddr;
use tracing::info;

/// Describe every metric the relay records to the installed recorder.
///
/// Descriptions given before a recorder is installed are lost.
pub fn describe_metrics() {
    describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused by the registry or during shutdown"
    );
    describe_counter!(names::MESSAGES_INBOUND, "Messages received from clients");
    describe_counter!(
        names::MESSAGES_BYTES,
        Unit::Bytes,
        "Payload bytes received from clients"
    );
    describe_counter!(
        names::MESSAGES_OVERSIZED,
        "Inbound messages discarded for exceeding the size limit"
    );
    describe_counter!(names::DELIVERIES_TOTAL, "Messages queued for recipients");
    describe_counter!(
        names::DROPPED_OLDEST,
        "Queued messages evicted by the drop-oldest policy"
    );
    describe_counter!(
        names::SLOW_CONSUMERS,
        "Connections put into draining because their queue was full"
    );
    describe_counter!(names::TRANSPORT_ERRORS, "Transport failures by stage");
    describe_histogram!(
        names::FANOUT_SECONDS,
        Unit::Seconds,
        "Time from receipt to the end of fan-out"
    );
}

/// Install the Prometheus exporter and describe the relay's metrics.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start metrics server on {addr}"))?;

    describe_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}
