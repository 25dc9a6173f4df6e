//! Server entry points for both deployment modes.
//!
//! In `http` mode axum accepts and upgrades connections at the configured
//! path and hands each socket to the relay. In `standalone` mode the relay
//! drives a dedicated tokio-tungstenite listener itself.

use crate::config::{Config, TransportMode};
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use relay_core::Relay;
use relay_transport::{axum_ws, WebSocketConfig, WebSocketTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay every socket is attached to.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
}

/// Run the relay server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to bind or stops abnormally.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        match config.metrics_addr() {
            Ok(addr) => {
                if let Err(e) = metrics::start_metrics_server(addr) {
                    error!("Failed to start metrics server: {:#}", e);
                }
            }
            Err(e) => error!("Failed to start metrics server: {:#}", e),
        }
    }

    let relay = Relay::new(config.to_relay_config());
    let addr = config.bind_addr()?;

    let result = match config.transport.mode {
        TransportMode::Http => serve_http(relay.clone(), config, addr).await,
        TransportMode::Standalone => serve_standalone(&relay, &config, addr).await,
    };

    relay.shutdown().await;
    result
}

async fn serve_http(relay: Relay, config: Config, addr: SocketAddr) -> Result<()> {
    let path = config.transport.websocket_path.clone();
    let state = Arc::new(AppState { relay, config });

    let app = router(state, &path);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, path);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")?;

    Ok(())
}

/// Routes for `http` mode: the WebSocket endpoint at `path` plus `/health`.
fn router(state: Arc<AppState>, path: &str) -> Router {
    Router::new()
        .route(path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn serve_standalone(relay: &Relay, config: &Config, addr: SocketAddr) -> Result<()> {
    let transport = WebSocketTransport::new(WebSocketConfig {
        bind_addr: addr,
        max_message_size: config.relay.max_message_size,
        ..Default::default()
    })
    .await
    .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Relay server listening on ws://{}", addr);

    tokio::select! {
        () = relay.serve(&transport) => warn!("Listener stopped accepting"),
        () = shutdown_signal() => {}
    }

    Ok(())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        // Without a signal handler, keep serving
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "messages": stats.broadcast.messages,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let conn = axum_ws::into_connection(
            socket,
            Some(remote.to_string()),
            state.config.relay.max_message_size,
        );
        match state.relay.attach(conn) {
            Ok(id) => debug!(connection = %id, remote = %remote, "WebSocket connected"),
            Err(e) => debug!(remote = %remote, error = %e, "WebSocket refused"),
        }
    })
}
