//! campuslink - campus SSO session relay.
//!
//! Logs members in through the university CAS, keeps their authenticated
//! sessions in memory and hands out bearer tokens bound to them.

use std::io;

use anyhow::Result;
use campuslink_core::{CoreConfig, TunnelCipher};
use tokio::net::TcpListener;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use campuslink_server::config::ServerConfig;
use campuslink_server::{router, AppState};

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes buffered log lines when dropped.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, guard) = tracing_appender::non_blocking(io::stdout());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

/// Log where each provider endpoint is actually reached through the gateway
fn log_tunnel_routes(config: &CoreConfig) {
    let tunnel = TunnelCipher::new(&config.tunnel);
    if !tunnel.is_enabled() {
        return;
    }
    let endpoints = [
        ("login", &config.provider.login_url),
        ("landing", &config.provider.landing_url),
        ("status", &config.provider.status_url),
    ];
    for (name, url) in endpoints {
        let routed = tunnel.to_tunnel_url(url);
        match tunnel.from_tunnel_url(&routed) {
            Some(target) if routed != *url => {
                info!(endpoint = name, via = %routed, target = %target, "Tunnelled endpoint")
            }
            _ => info!(endpoint = name, url = %routed, "Endpoint not tunnelled"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    let config = ServerConfig::from_env()?;
    info!(
        addr = %config.http_addr,
        tunnel = config.core.tunnel.enabled,
        session_ttl_secs = config.core.session.ttl.as_secs(),
        "campuslink starting"
    );
    log_tunnel_routes(&config.core);

    let state = AppState::from_config(&config.core);
    let sweeper = state
        .store
        .spawn_sweeper(config.core.session.sweep_interval);

    let listener = TcpListener::bind(config.http_addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("campuslink shutting down");
    Ok(())
}
