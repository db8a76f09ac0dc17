// src/auth/models.rs

use serde::{Deserialize, Serialize};

pub use crate::store::models::User;

#[derive(Debug, Deserialize)]
pub struct CheckEmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct CheckEmailResponse {
    pub exists: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupIndividualRequest {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignupGroupRequest {
    pub email: String,
    pub name: Option<String>,
    pub group_name: String,
    pub group_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    pub discord_user_id: Option<String>,
    pub locale: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
}
