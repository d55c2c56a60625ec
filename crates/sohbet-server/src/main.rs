//! # sohbet-server
//!
//! Real-time group chat relay.
//!
//! This binary provides:
//! - **WebSocket hub** at `/ws` fanning every message out to all connected
//!   clients, with presence counts and seen acknowledgements
//! - **Channel history** (in-memory or SQLite) replayed on request
//! - **File sharing** via multipart upload, announced in the channel
//! - **Numerology proxy** forwarding analysis requests to an external service
//! - Static assets and uploaded files over plain HTTP

mod api;
mod config;
mod connection;
mod error;
mod hub;
mod numerology;
mod persistence;
mod upload;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sohbet_server=debug")),
        )
        .init();

    info!("Starting sohbet server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        history = ?config.history,
        upload_dir = %config.upload_dir.display(),
        numerology_key = config.numerology_api_key.is_some(),
        "Loaded configuration"
    );
    let http_addr = config.http_addr;

    // -----------------------------------------------------------------------
    // 3. History, hub and uploads
    // -----------------------------------------------------------------------
    let state = AppState::from_config(config).await?;

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
