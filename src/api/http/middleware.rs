// src/api/http/middleware.rs
// Session-cookie and `X-Role-ID` resolution, shared by every handler
// that needs an authenticated user or a role context. Kept as plain
// functions handlers call explicitly rather than custom extractors —
// one obvious place to read, no magic trait machinery.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde_json::json;

use crate::auth::session::SESSION_COOKIE_NAME;
use crate::error::{AppError, AppResult};
use crate::role::RoleContext;
use crate::state::AppState;
use crate::store::models::User;

pub const ROLE_HEADER: &str = "X-Role-ID";

pub async fn require_user(state: &AppState, jar: &CookieJar) -> AppResult<User> {
    let session_id = jar
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .ok_or(AppError::AuthRequired)?;

    let (user, _session) = state
        .auth_service
        .authenticate(&session_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or(AppError::AuthRequired)?;

    Ok(user)
}

pub async fn require_role(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> AppResult<RoleContext> {
    let user = require_user(state, jar).await?;

    let role_id = headers
        .get(ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing X-Role-ID header".to_string()))?;

    state.role_resolver.resolve(&user.id, role_id).await
}

/// Applied to the `/api/auth` nest only, per `RateLimitConfig`.
pub async fn rate_limit_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if !state.rate_limiter.try_acquire() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"success": false, "error": {"message": "rate_limited"}})),
        )
            .into_response();
    }
    next.run(req).await
}
