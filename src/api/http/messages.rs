// src/api/http/messages.rs
// Message history: list/page, manual append, bulk clear, bulk migrate
// (client-side local-storage import), and keyword search.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{delete, get, post};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::models::Message;
use crate::utils::get_timestamp;

use super::middleware::require_user;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/", get(list_messages).post(save_message).delete(clear_messages))
        .route("/migrate", post(migrate_messages))
        .route("/search", get(search_messages))
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data })
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(rename = "roleId")]
    role_id: String,
    limit: Option<i64>,
    before: Option<String>,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Envelope<Vec<Message>>>> {
    let user = require_user(&state, &jar).await?;
    state.role_resolver.resolve(&user.id, &query.role_id).await?;

    let messages = state
        .store
        .list_messages(&query.role_id, query.limit.unwrap_or(50), query.before.as_deref())
        .await
        .map_err(AppError::Internal)?;
    Ok(ok(messages))
}

#[derive(Deserialize)]
struct SaveMessageRequest {
    #[serde(rename = "roleId")]
    role_id: String,
    role: String,
    content: String,
}

async fn save_message(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<SaveMessageRequest>,
) -> AppResult<Json<Envelope<Message>>> {
    let user = require_user(&state, &jar).await?;
    let ctx = state.role_resolver.resolve(&user.id, &req.role_id).await?;

    let message = Message {
        id: Uuid::new_v4().to_string(),
        user_id: ctx.user_id,
        role_id: ctx.role_id,
        group_id: ctx.group_id,
        role: req.role,
        content: req.content,
        created_at: get_timestamp(),
    };
    state.store.save_message(&message).await.map_err(AppError::Internal)?;
    Ok(ok(message))
}

#[derive(Deserialize)]
struct ClearQuery {
    #[serde(rename = "roleId")]
    role_id: String,
}

async fn clear_messages(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<ClearQuery>,
) -> AppResult<Json<Envelope<()>>> {
    let user = require_user(&state, &jar).await?;
    state.role_resolver.resolve(&user.id, &query.role_id).await?;
    state.store.clear_messages(&query.role_id).await.map_err(AppError::Internal)?;
    Ok(ok(()))
}

#[derive(Deserialize)]
struct MigrateMessageEntry {
    #[serde(rename = "roleId")]
    role_id: String,
    role: String,
    content: String,
    #[serde(rename = "createdAt")]
    created_at: Option<i64>,
}

#[derive(Deserialize)]
struct MigrateRequest {
    messages: Vec<MigrateMessageEntry>,
}

/// Imports client-local message history. Each entry is validated
/// against its own `roleId` so a single bad role in the batch can't
/// smuggle writes into a role the caller doesn't own.
async fn migrate_messages(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<MigrateRequest>,
) -> AppResult<Json<Envelope<usize>>> {
    let user = require_user(&state, &jar).await?;

    let mut migrated = 0;
    for entry in req.messages {
        let ctx = state.role_resolver.resolve(&user.id, &entry.role_id).await?;
        let message = Message {
            id: Uuid::new_v4().to_string(),
            user_id: ctx.user_id,
            role_id: ctx.role_id,
            group_id: ctx.group_id,
            role: entry.role,
            content: entry.content,
            created_at: entry.created_at.unwrap_or_else(get_timestamp),
        };
        state.store.save_message(&message).await.map_err(AppError::Internal)?;
        migrated += 1;
    }

    Ok(ok(migrated))
}

#[derive(Deserialize)]
struct SearchQuery {
    keyword: String,
    #[serde(rename = "roleId")]
    role_id: String,
    limit: Option<i64>,
}

async fn search_messages(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Envelope<Vec<Message>>>> {
    let user = require_user(&state, &jar).await?;
    state.role_resolver.resolve(&user.id, &query.role_id).await?;

    let messages = state
        .store
        .search_messages(&query.role_id, &query.keyword, query.limit.unwrap_or(50))
        .await
        .map_err(AppError::Internal)?;
    Ok(ok(messages))
}
