// src/api/http/scheduled_jobs.rs
// Read/cancel surface for the Scheduled Jobs Runner (C8). Creation
// happens as a side effect of a turn (a tool asks the model to schedule
// a follow-up); this surface is for the client's own jobs list.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::models::ScheduledJob;

use super::middleware::require_user;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/", get(list_jobs))
        .route("/{id}", delete(cancel_job))
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data })
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AppResult<Json<Envelope<Vec<ScheduledJob>>>> {
    let user = require_user(&state, &jar).await?;
    let jobs = state.store.list_scheduled_jobs_for_user(&user.id).await.map_err(AppError::Internal)?;
    Ok(ok(jobs))
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<bool>>> {
    let user = require_user(&state, &jar).await?;
    let job = state
        .store
        .get_scheduled_job(&id)
        .await
        .map_err(AppError::Internal)?
        .ok_or(AppError::Validation("job not found".to_string()))?;
    if job.user_id != user.id {
        return Err(AppError::RoleForbidden);
    }
    let cancelled = state.store.cancel_scheduled_job(&id).await.map_err(AppError::Internal)?;
    Ok(ok(cancelled))
}
