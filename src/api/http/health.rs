// src/api/http/health.rs
// Health, readiness, and liveness probes for load balancers and container
// orchestrators.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    db: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    migrations: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl axum::response::IntoResponse {
    let db_ok = sqlx::query("SELECT 1").fetch_one(state.store.pool()).await.is_ok();

    let response = HealthResponse {
        status: if db_ok { "healthy" } else { "unhealthy" },
        db: if db_ok { "ok" } else { "error" },
    };

    if db_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /ready
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl axum::response::IntoResponse {
    let migrations_ok = sqlx::query("SELECT 1 FROM users LIMIT 1").fetch_optional(state.store.pool()).await.is_ok();

    let response = ReadyResponse {
        status: if migrations_ok { "ready" } else { "not_ready" },
        migrations: if migrations_ok { "applied" } else { "pending" },
    };

    if migrations_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /live
pub async fn liveness_check() -> impl axum::response::IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "alive"})))
}
