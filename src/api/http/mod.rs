// src/api/http/mod.rs
// HTTP route tree. Each submodule owns one component's surface; this
// file only nests them under their §6 path prefixes.

pub mod auth;
pub mod chat;
pub mod env;
pub mod health;
pub mod mcp;
pub mod messages;
pub mod middleware;
pub mod roles;
pub mod scheduled_jobs;
pub mod viewer;

use std::sync::Arc;

use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    let api = Router::new()
        .nest("/auth", auth::router().layer(from_fn(middleware::rate_limit_auth)))
        .nest("/roles", roles::router())
        .nest("/messages", messages::router())
        .nest("/chat", chat::router())
        .nest("/mcp", mcp::router())
        .nest("/viewer", viewer::router())
        .nest("/scheduled-jobs", scheduled_jobs::router())
        .nest("/env", env::router());

    Router::new()
        .nest("/api", api)
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/live", get(health::liveness_check))
        .route("/metrics", get(crate::metrics::metrics_handler))
}
