// src/api/http/auth.rs
// Identity & Session (C2) HTTP surface, plus the OAuth Broker (C3)
// start/callback/token routes — grouped under /api/auth since both
// share the session cookie and neither carries a role header.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, patch, post};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::session::{expired_session_cookie, session_cookie};
use crate::auth::{
    AcceptInvitationRequest, CheckEmailRequest, CheckEmailResponse, LoginRequest, SignupGroupRequest,
    SignupIndividualRequest, UpdateMeRequest,
};
use crate::config::CONFIG;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::models::User;

use super::middleware::require_user;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/check-email", post(check_email))
        .route("/login", post(login))
        .route("/signup/individual", post(signup_individual))
        .route("/signup/group", post(signup_group))
        .route("/accept-invitation", post(accept_invitation))
        .route("/logout", post(logout))
        .route("/me", patch(update_me))
        .route("/{provider}/start", get(oauth_start))
        .route("/{provider}/callback", get(oauth_callback))
        .route("/oauth/token/{provider}", get(oauth_token))
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data })
}

async fn check_email(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckEmailRequest>,
) -> AppResult<Json<Envelope<CheckEmailResponse>>> {
    let exists = state.auth_service.check_email(&req.email).await.map_err(AppError::Internal)?;
    Ok(ok(CheckEmailResponse { exists }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<Envelope<User>>)> {
    let (user, session) = state
        .auth_service
        .login(&req.email)
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let jar = jar.add(session_cookie(session.id, CONFIG.session_ttl_days));
    Ok((jar, ok(user)))
}

async fn signup_individual(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<SignupIndividualRequest>,
) -> AppResult<(CookieJar, Json<Envelope<User>>)> {
    let (user, session) = state
        .auth_service
        .signup_individual(&req.email, req.name.as_deref())
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let jar = jar.add(session_cookie(session.id, CONFIG.session_ttl_days));
    Ok((jar, ok(user)))
}

async fn signup_group(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<SignupGroupRequest>,
) -> AppResult<(CookieJar, Json<Envelope<User>>)> {
    let (user, session, _group_id) = state
        .auth_service
        .signup_group(&req.email, req.name.as_deref(), &req.group_name, req.group_url.as_deref())
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let jar = jar.add(session_cookie(session.id, CONFIG.session_ttl_days));
    Ok((jar, ok(user)))
}

async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<AcceptInvitationRequest>,
) -> AppResult<Json<Envelope<()>>> {
    let user = require_user(&state, &jar).await?;
    state
        .auth_service
        .accept_invitation(&req.code, &user.id)
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?;
    Ok(ok(()))
}

async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> AppResult<(CookieJar, Json<Envelope<()>>)> {
    if let Some(cookie) = jar.get(crate::auth::session::SESSION_COOKIE_NAME) {
        state.auth_service.logout(cookie.value()).await.map_err(AppError::Internal)?;
    }
    let jar = jar.add(expired_session_cookie());
    Ok((jar, ok(())))
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<UpdateMeRequest>,
) -> AppResult<Json<Envelope<User>>> {
    let user = require_user(&state, &jar).await?;
    let updated = state
        .auth_service
        .update_me(&user.id, req.discord_user_id.as_deref(), req.locale.as_deref(), req.timezone.as_deref())
        .await
        .map_err(AppError::Internal)?;
    Ok(ok(updated))
}

async fn oauth_start(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(provider): Path<String>,
) -> AppResult<Redirect> {
    let user = require_user(&state, &jar).await?;
    let auth_url = state.oauth_broker.start(&user.id, &provider).map_err(AppError::Internal)?;
    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

/// Renders an HTML page that `postMessage`s the result to its opener
/// and closes itself, per §6's callback contract.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    match state.oauth_broker.callback(&provider, &query.code, &query.state).await {
        Ok(account_email) => Html(oauth_result_page(&provider, Some(&account_email), None)),
        Err(e) => Html(oauth_result_page(&provider, None, Some(&e.to_string()))),
    }
}

fn oauth_result_page(provider: &str, account_email: Option<&str>, error: Option<&str>) -> String {
    let payload = match (account_email, error) {
        (Some(email), _) => json!({
            "type": "oauth_success",
            "provider": provider,
            "accountEmail": email,
        }),
        (None, err) => json!({
            "type": "oauth_error",
            "provider": provider,
            "message": err.unwrap_or("oauth failed"),
        }),
    };
    format!(
        "<!doctype html><html><body><script>\
         window.opener && window.opener.postMessage({}, '*');\
         window.close();\
         </script></body></html>",
        payload
    )
}

#[derive(Deserialize)]
struct TokenQuery {
    #[serde(rename = "accountEmail")]
    account_email: Option<String>,
}

#[derive(Serialize)]
struct TokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "accountEmail")]
    account_email: String,
}

async fn oauth_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(provider): Path<String>,
    Query(query): Query<TokenQuery>,
) -> AppResult<Json<Envelope<TokenResponse>>> {
    let user = require_user(&state, &jar).await?;
    let token = state
        .oauth_broker
        .get_token(&user.id, &provider, query.account_email.as_deref())
        .await
        .map_err(|_| AppError::OAuthRequired {
            provider: provider.clone(),
            account_email: query.account_email.clone(),
        })?;

    Ok(ok(TokenResponse {
        access_token: token.access_token,
        account_email: token.account_email,
    }))
}
