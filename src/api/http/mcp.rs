// src/api/http/mcp.rs
// MCP Registry (C4) management surface: catalog, install, toggle,
// remove, and the OAuth-connections snapshot the client uses to render
// account state without a round trip through the OAuth broker itself.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::mcp::registry::{AddPredefinedOpts, AvailableServerView, InstalledServerView};
use crate::state::AppState;

use super::middleware::require_user;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/servers", get(list_installed))
        .route("/available-servers", get(list_available))
        .route("/servers/add-predefined", post(add_predefined))
        .route("/servers/{id}", patch(set_enabled).delete(remove_server))
        .route("/oauth/connections", get(oauth_connections))
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data })
}

async fn list_installed(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AppResult<Json<Envelope<Vec<InstalledServerView>>>> {
    let user = require_user(&state, &jar).await?;
    let servers = state.mcp_registry.installed_for_user(&user.id).await.map_err(AppError::Internal)?;
    Ok(ok(servers))
}

async fn list_available(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AppResult<Json<Envelope<Vec<AvailableServerView>>>> {
    require_user(&state, &jar).await?;
    Ok(ok(state.mcp_registry.available_servers()))
}

#[derive(Deserialize)]
struct AddPredefinedRequest {
    #[serde(rename = "serverId")]
    server_id: String,
    #[serde(rename = "accountEmail")]
    account_email: Option<String>,
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

async fn add_predefined(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<AddPredefinedRequest>,
) -> AppResult<Json<Envelope<InstalledServerView>>> {
    let user = require_user(&state, &jar).await?;
    let view = state
        .mcp_registry
        .add_predefined(
            &user.id,
            &req.server_id,
            AddPredefinedOpts {
                account_email: req.account_email,
                api_key: req.api_key,
            },
        )
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?;
    Ok(ok(view))
}

#[derive(Deserialize)]
struct SetEnabledRequest {
    enabled: Option<bool>,
}

async fn set_enabled(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(req): Json<SetEnabledRequest>,
) -> AppResult<Json<Envelope<()>>> {
    require_user(&state, &jar).await?;
    if let Some(enabled) = req.enabled {
        state.mcp_registry.set_enabled(&id, enabled).await.map_err(AppError::Internal)?;
    }
    Ok(ok(()))
}

async fn remove_server(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<()>>> {
    require_user(&state, &jar).await?;
    state.mcp_registry.remove(&id).await.map_err(AppError::Internal)?;
    Ok(ok(()))
}

#[derive(Serialize)]
struct AccountEntry {
    #[serde(rename = "accountEmail")]
    account_email: String,
}

async fn oauth_connections(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AppResult<Json<Envelope<HashMap<String, Vec<AccountEntry>>>>> {
    let user = require_user(&state, &jar).await?;
    let tokens = state.store.list_oauth_connections(&user.id).await.map_err(AppError::Internal)?;

    let mut by_provider: HashMap<String, Vec<AccountEntry>> = HashMap::new();
    for token in tokens {
        by_provider
            .entry(token.provider)
            .or_default()
            .push(AccountEntry { account_email: token.account_email });
    }
    Ok(ok(by_provider))
}
