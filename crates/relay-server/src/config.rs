//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (explicit path or the first default location found)
//! - Environment variables (RELAY_*, nested keys separated by `__`)

use anyhow::{Context, Result};
use relay_core::{BackpressurePolicy, RelayConfig, DEFAULT_MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations searched when no config file is given.
const DEFAULT_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Queueing and connection limits.
    #[serde(default)]
    pub relay: RelayTuning,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// How the WebSocket endpoint is exposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Mounted on an HTTP router next to `/health`.
    #[default]
    Http,
    /// A dedicated WebSocket listener accepting upgrades on any path.
    Standalone,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Deployment mode.
    #[serde(default)]
    pub mode: TransportMode,

    /// Path for the WebSocket endpoint in `http` mode.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Relay tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayTuning {
    /// Outbound queue capacity per connection.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// What to do when a connection's queue is full.
    #[serde(default)]
    pub backpressure: BackpressurePolicy,

    /// Time a slow consumer gets to drain before it is dropped, in milliseconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,

    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_drain_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            relay: RelayTuning::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for RelayTuning {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backpressure: BackpressurePolicy::default(),
            drain_timeout_ms: default_drain_timeout(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, with `RELAY_*` environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or if any source
    /// cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => find_default_file(),
        };

        let mut builder = ::config::Config::builder();
        if let Some(file) = &file {
            tracing::debug!("Loading config from {}", file.display());
            builder = builder.add_source(
                ::config::File::from(file.as_path())
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                ::config::Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Resolve the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` does not resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address for {}:{}", self.host, self.port))
    }

    /// Resolve the address of the Prometheus exporter.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not resolve.
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        let mut addr = self.bind_addr()?;
        addr.set_port(self.metrics.port);
        Ok(addr)
    }

    /// Relay settings derived from this configuration.
    #[must_use]
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            queue_capacity: self.relay.queue_capacity,
            backpressure: self.relay.backpressure,
            drain_timeout: Duration::from_millis(self.relay.drain_timeout_ms),
            max_connections: self.relay.max_connections,
            max_message_size: self.relay.max_message_size,
        }
    }
}

fn find_default_file() -> Option<PathBuf> {
    DEFAULT_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}
