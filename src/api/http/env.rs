// src/api/http/env.rs
// GET /api/env — the one excluded-path endpoint besides auth, per §6.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Json;
use serde::Serialize;

use crate::config::helpers::env_or;
use crate::config::CONFIG;
use crate::state::AppState;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new().route("/", get(get_env))
}

#[derive(Serialize)]
struct EnvResponse {
    env: String,
    #[serde(rename = "isDevelopment")]
    is_development: bool,
    #[serde(rename = "isTest")]
    is_test: bool,
    #[serde(rename = "isProduction")]
    is_production: bool,
    port: u16,
    host: String,
}

async fn get_env(State(state): State<Arc<AppState>>) -> Json<EnvResponse> {
    let _ = &state;
    let env = env_or("APP_ENV", "development");
    Json(EnvResponse {
        is_development: env == "development",
        is_test: env == "test",
        is_production: env == "production",
        env,
        port: CONFIG.server.port,
        host: CONFIG.server.host.clone(),
    })
}
