// src/store/models.rs
// Row types for every table in the relational schema (§3 of the data model).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub account_type: String,
    pub discord_user_id: Option<String>,
    pub locale: Option<String>,
    pub timezone: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub group_id: String,
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: String,
    pub code: String,
    pub group_id: String,
    pub created_by: String,
    pub email: Option<String>,
    pub role: String,
    pub expires_at: Option<i64>,
    pub used_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub name: String,
    pub job_desc: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub role_id: String,
    pub group_id: Option<String>,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OAuthToken {
    pub provider: String,
    pub user_id: String,
    pub account_email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct McpServerConfig {
    pub id: String,
    pub config: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub skill_type: String,
    pub config: Option<String>,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledJob {
    pub id: String,
    pub user_id: String,
    pub role_id: String,
    pub description: String,
    pub schedule_type: String,
    pub run_at: Option<i64>,
    pub status: String,
    pub last_run_at: Option<i64>,
    pub last_error: Option<String>,
    pub hold_until: Option<i64>,
    pub run_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub user_id: String,
    pub key: String,
    pub value: String,
}

/// Transient, never persisted — handed to the client and to tools by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub preview_url: String,
    pub source_url: Option<String>,
    pub file_uri: Option<String>,
    pub absolute_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}
