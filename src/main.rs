//! Tank Arena Server - authoritative real-time server for a top-down
//! multiplayer tank arena
//!
//! This is the main entry point. It handles:
//! - Procedural map generation at startup
//! - WebSocket sessions for players and read-only map viewers
//! - The fixed-interval simulation and broadcast loops
//! - A health endpoint

mod app;
mod config;
mod game;
mod http;
mod util;
mod ws;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Tank Arena Server");
    info!("Server address: {}", config.server_addr);
    info!(
        width = config.map_width,
        height = config.map_height,
        seed = ?config.map_seed,
        "Generating map"
    );

    // Map generation is CPU bound, keep it off the async workers
    let state = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || AppState::new(config)).await?
    };

    // Spawn simulation and broadcast loops
    let _loops = state.spawn_loops();

    // Build router
    let router = build_router(state);

    // Start server
    let addr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.ws_path);
    info!("Map viewer endpoint: ws://{}{}", addr, config.map_ws_path);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
