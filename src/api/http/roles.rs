// src/api/http/roles.rs
// Role Context (C5) management plus the Memory Service (C6) operations
// that are scoped per-role: overview, remove, edit, save-to-memory.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::memory::{EditResult, MemoryOverview, RemoveResult};
use crate::state::AppState;
use crate::store::models::Role;

use super::middleware::require_user;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/{id}/switch", post(switch_role))
        .route("/{id}/memory-overview", get(memory_overview))
        .route("/{id}/remove-memories", post(remove_memories))
        .route("/{id}/edit-memories", post(edit_memories))
        .route("/{id}/save-to-memory", post(save_to_memory))
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data })
}

#[derive(Serialize)]
struct RolesResponse {
    roles: Vec<Role>,
    #[serde(rename = "currentRoleId")]
    current_role_id: Option<String>,
}

async fn list_roles(State(state): State<Arc<AppState>>, jar: CookieJar) -> AppResult<Json<Envelope<RolesResponse>>> {
    let user = require_user(&state, &jar).await?;
    let roles = state.role_resolver.list_roles(&user.id).await.map_err(AppError::Internal)?;
    let current_role_id = state.role_resolver.current_role_id(&user.id).await.map_err(AppError::Internal)?;
    Ok(ok(RolesResponse { roles, current_role_id }))
}

#[derive(Deserialize)]
struct CreateRoleRequest {
    name: String,
    #[serde(rename = "groupId")]
    group_id: Option<String>,
}

async fn create_role(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<CreateRoleRequest>,
) -> AppResult<Json<Envelope<Role>>> {
    let user = require_user(&state, &jar).await?;
    let role = state
        .role_resolver
        .create_role(&user.id, &req.name, req.group_id.as_deref())
        .await
        .map_err(AppError::Internal)?;
    Ok(ok(role))
}

async fn switch_role(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<()>>> {
    let user = require_user(&state, &jar).await?;
    state.role_resolver.switch_role(&user.id, &id).await?;
    Ok(ok(()))
}

async fn memory_overview(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<MemoryOverview>>> {
    let user = require_user(&state, &jar).await?;
    let _ctx = state.role_resolver.resolve(&user.id, &id).await?;
    let overview = state.memory_service.overview(&id).await.map_err(AppError::Internal)?;
    Ok(ok(overview))
}

#[derive(Deserialize)]
struct SelectionRequest {
    selection: String,
}

async fn remove_memories(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(req): Json<SelectionRequest>,
) -> AppResult<Json<Envelope<RemoveResult>>> {
    let user = require_user(&state, &jar).await?;
    let _ctx = state.role_resolver.resolve(&user.id, &id).await?;
    let result = state.memory_service.remove(&id, &req.selection).await.map_err(AppError::Internal)?;
    Ok(ok(result))
}

#[derive(Deserialize)]
struct EditMemoriesRequest {
    selection: String,
    instruction: String,
}

async fn edit_memories(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(req): Json<EditMemoriesRequest>,
) -> AppResult<Json<Envelope<EditResult>>> {
    let user = require_user(&state, &jar).await?;
    let _ctx = state.role_resolver.resolve(&user.id, &id).await?;
    let result = state
        .memory_service
        .edit(&id, &req.selection, &req.instruction)
        .await
        .map_err(AppError::Internal)?;
    Ok(ok(result))
}

#[derive(Deserialize)]
struct SaveToMemoryRequest {
    text: String,
}

async fn save_to_memory(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(req): Json<SaveToMemoryRequest>,
) -> AppResult<Json<Envelope<()>>> {
    let user = require_user(&state, &jar).await?;
    let _ctx = state.role_resolver.resolve(&user.id, &id).await?;
    state.memory_service.save_to_memory(&id, &req.text).await.map_err(AppError::Internal)?;
    Ok(ok(()))
}
