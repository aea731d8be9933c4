use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::orchestrator::Orchestrator;
use super::ws;

/// Configuration for the control server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub dev_mode: bool,
    /// How long to wait for active runs to wind down on shutdown
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3142,
            dev_mode: false,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Build the full application router: REST control surface plus event stream.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Recover interrupted runs, serve until Ctrl+C, then drain active runs.
pub async fn start_server(config: ServerConfig, orchestrator: Orchestrator) -> Result<()> {
    let recovered = orchestrator
        .recover()
        .await
        .context("Failed to recover interrupted runs")?;
    if recovered > 0 {
        tracing::warn!(recovered, "Marked runs from a previous process as interrupted");
    }

    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
    });
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        max_concurrent_runs = orchestrator.config().max_concurrent_runs,
        "repobot server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if !orchestrator.shutdown(config.shutdown_grace).await {
        tracing::warn!("Some runs did not finish within the shutdown grace period");
    }
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
