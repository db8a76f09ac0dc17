// src/config/server.rs
// Server, database, logging, and rate-limit configuration.

use serde::{Deserialize, Serialize};

use super::helpers::{env_opt, env_or, env_parsed};

/// HTTP server bind configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parsed("PORT", 8080),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database configuration. `DATA_STORE` names the SQLite file (or
/// `:memory:`) per the environment variable list in the external
/// interfaces section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            path: env_or("DATA_STORE", "relay.db"),
            max_connections: env_parsed("SQLITE_MAX_CONNECTIONS", 5),
        }
    }

    pub fn connection_string(&self) -> String {
        if self.path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", self.path)
        }
    }
}

/// `tracing-subscriber` filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            filter: env_or("RUST_LOG", "info,relay_backend=debug"),
        }
    }
}

/// Auth-endpoint rate limiting (requests per minute, per process).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub auth_requests_per_minute: u32,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            auth_requests_per_minute: env_parsed("AUTH_RATE_LIMIT_PER_MINUTE", 30),
        }
    }
}

/// One OAuth provider's client credentials. Absent credentials are not
/// fatal at boot; only `POST /oauth/:provider/start` for that provider
/// fails at request time (see AppError::MissingOAuthCredentials).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl OAuthProviderConfig {
    fn from_env(prefix: &str) -> Self {
        Self {
            client_id: env_opt(&format!("{prefix}_CLIENT_ID")),
            client_secret: env_opt(&format!("{prefix}_CLIENT_SECRET")),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub google: OAuthProviderConfig,
    pub github: OAuthProviderConfig,
    pub slack: OAuthProviderConfig,
    pub redirect_base_url: String,
}

impl OAuthConfig {
    pub fn from_env() -> Self {
        Self {
            google: OAuthProviderConfig::from_env("GOOGLE"),
            github: OAuthProviderConfig::from_env("GITHUB"),
            slack: OAuthProviderConfig::from_env("SLACK"),
            redirect_base_url: env_or("OAUTH_REDIRECT_BASE_URL", "http://localhost:8080"),
        }
    }

    pub fn provider(&self, name: &str) -> Option<&OAuthProviderConfig> {
        match name {
            "google" => Some(&self.google),
            "github" => Some(&self.github),
            "slack" => Some(&self.slack),
            _ => None,
        }
    }
}

/// Scheduled Jobs Runner tick cadence and execution ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub job_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            tick_interval_secs: env_parsed("SCHEDULER_TICK_INTERVAL_SECS", 30),
            job_timeout_secs: env_parsed("SCHEDULER_JOB_TIMEOUT_SECS", 15 * 60),
        }
    }
}

/// Viewer Attachment temp-file location and sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    pub temp_dir: String,
    pub sweep_interval_secs: u64,
    pub max_age_secs: i64,
}

impl ViewerConfig {
    pub fn from_env() -> Self {
        Self {
            temp_dir: env_or("VIEWER_TEMP_DIR", "./viewer-tmp"),
            sweep_interval_secs: env_parsed("VIEWER_SWEEP_INTERVAL_SECS", 3600),
            max_age_secs: env_parsed("VIEWER_MAX_AGE_SECS", 24 * 3600),
        }
    }
}
