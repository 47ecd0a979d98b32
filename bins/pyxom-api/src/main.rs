mod catalog;
mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use catalog::Catalog;
use pyxom_common::Config;
use pyxom_engine::TestRunner;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct AppState {
    pub runner: TestRunner,
    pub catalog: Catalog,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Pyxom API booting...");

    let config = Config::from_env();
    info!(
        backend = %config.backend,
        pool_size = config.pool_size,
        default_timeout_ms = config.default_timeout_ms,
        max_timeout_ms = config.max_timeout_ms,
        "Configuration loaded"
    );

    let catalog = Catalog::load(&config.exercises_path)?;
    info!(exercises = catalog.len(), path = %config.exercises_path, "Exercise catalog loaded");

    metrics::init_metrics();

    let runner = pyxom_engine::build_runner(&config).context("Failed to build sandbox backend")?;
    let state = Arc::new(AppState { runner, catalog });

    let app = Router::new().merge(routes::routes()).with_state(state.clone());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received shutdown signal, draining worker pool...");
            }
        })
        .await
        .context("Server error")?;

    state.runner.pool().shutdown().await;
    info!("Pyxom API stopped");

    Ok(())
}
