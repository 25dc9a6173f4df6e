//! # Relay Server
//!
//! Realtime broadcast relay: every message a client sends is forwarded to
//! every other connected client.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with custom config
//! relay --config /path/to/relay.toml
//!
//! # Run with environment variables
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 RELAY_RELAY__BACKPRESSURE=drop-oldest relay
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "Realtime broadcast relay server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides the configuration).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the configuration).
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,relay_core=debug,relay_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!(
        "Starting relay server on {}:{} ({:?} mode)",
        config.host,
        config.port,
        config.transport.mode
    );

    // Start the server
    handlers::run_server(config).await?;

    tracing::info!("Relay server stopped");
    Ok(())
}
