mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use pygrade_common::config::GraderConfig;
use pygrade_engine::{build_sandbox, Sandbox};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

pub struct AppState {
    pub sandbox: Arc<dyn Sandbox>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("pygrade API booting...");

    let config = GraderConfig::load_default().map_err(|e| {
        error!("Failed to load grader configuration: {:#}", e);
        e
    })?;

    info!(
        backend = %config.backend,
        timeout_ms = config.timeout_ms,
        "Loaded grader configuration"
    );

    let sandbox = build_sandbox(&config).context("Failed to initialize sandbox backend")?;
    let state = Arc::new(AppState { sandbox });

    // Build router
    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    // Start server
    let addr = std::env::var("PYGRADE_API_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
