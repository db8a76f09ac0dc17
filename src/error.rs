// src/error.rs
// API-boundary error type. Business logic returns `anyhow::Result`
// throughout (the teacher's universal style); conversion into `AppError`
// happens once, here, at the handler boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("auth_required")]
    AuthRequired,

    #[error("oauth_required")]
    OAuthRequired {
        provider: String,
        account_email: Option<String>,
    },

    #[error("role_not_found")]
    RoleNotFound,

    #[error("role_forbidden")]
    RoleForbidden,

    #[error("role_busy")]
    RoleBusy,

    #[error("tool_failed: {tool_name}: {detail}")]
    ToolFailed { tool_name: String, detail: String },

    #[error("tool_limit_exceeded")]
    ToolLimitExceeded,

    #[error("provider_error: {0}")]
    ProviderError(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("missing_oauth_credentials: {0}")]
    MissingOAuthCredentials(String),

    #[error("internal")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    account_email: Option<String>,
}

#[derive(Serialize)]
struct Envelope {
    success: bool,
    error: ErrorBody,
}

impl AppError {
    /// The stable error-kind string used in both the HTTP envelope and SSE
    /// `error` frames, per the error-kind list.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "auth_required",
            AppError::OAuthRequired { .. } => "oauth_required",
            AppError::RoleNotFound => "role_not_found",
            AppError::RoleForbidden => "role_forbidden",
            AppError::RoleBusy => "role_busy",
            AppError::ToolFailed { .. } => "tool_failed",
            AppError::ToolLimitExceeded => "tool_limit_exceeded",
            AppError::ProviderError(_) => "provider_error",
            AppError::Validation(_) => "validation",
            AppError::MissingOAuthCredentials(_) => "missing_oauth_credentials",
            AppError::Internal(_) => "internal",
        }
    }

    /// JSON body shared between the HTTP envelope and SSE error frames.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AppError::OAuthRequired {
                provider,
                account_email,
            } => json!({
                "type": "error",
                "kind": self.kind(),
                "message": self.to_string(),
                "provider": provider,
                "accountEmail": account_email,
            }),
            _ => json!({
                "type": "error",
                "kind": self.kind(),
                "message": self.to_string(),
            }),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Transport-level failures get real HTTP status codes; everything
        // else that is a parsable business error is 200 {success:false}
        // per the propagation policy.
        let status = match &self {
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::Internal(err) => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(%correlation_id, error = %err, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::OK,
        };

        let body = Envelope {
            success: false,
            error: ErrorBody {
                message: self.to_string(),
                provider: match &self {
                    AppError::OAuthRequired { provider, .. } => Some(provider.clone()),
                    _ => None,
                },
                account_email: match &self {
                    AppError::OAuthRequired { account_email, .. } => account_email.clone(),
                    _ => None,
                },
            },
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
