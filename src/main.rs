// src/main.rs
// HTTP entry point. Boots the store, wires AppState, spawns the jobs
// runner and the viewer sweep loop, then serves the axum router until
// SIGINT, shutting both background loops down cleanly on the way out.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use relay_backend::config::CONFIG;
use relay_backend::state::AppState;
use relay_backend::store::Store;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(CONFIG.logging.filter.clone())
        .init();

    relay_backend::metrics::init_metrics();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let store = Store::connect(&CONFIG.database.connection_string(), CONFIG.database.max_connections).await?;
    info!("connected to store at {}", CONFIG.database.path);

    let state = AppState::new(store).await?;
    let jobs_shutdown = state.spawn_jobs_runner();

    let viewer_service = state.viewer_service.clone();
    let mut sweep_interval = tokio::time::interval(viewer_service.sweep_interval());
    let sweep_handle = tokio::spawn(async move {
        loop {
            sweep_interval.tick().await;
            viewer_service.sweep().await;
        }
    });

    let app = relay_backend::api::http::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state));

    let bind_address = CONFIG.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("listening on {bind_address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep_handle.abort();
    let _ = jobs_shutdown.send(());

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
