// src/config/mod.rs
// Central configuration, composed from domain sub-configs the way the
// teacher crate composes `MiraConfig` from `server`/`llm`/`memory`/etc.
// submodules. Every field is optional-with-default; nothing here panics
// on a missing `.env`.

pub mod helpers;
pub mod llm;
pub mod server;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    pub static ref CONFIG: RelayConfig = RelayConfig::from_env();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub server: server::ServerConfig,
    pub database: server::DatabaseConfig,
    pub logging: server::LoggingConfig,
    pub rate_limit: server::RateLimitConfig,
    pub oauth: server::OAuthConfig,
    pub scheduler: server::SchedulerConfig,
    pub viewer: server::ViewerConfig,
    pub llm: llm::LlmConfig,
    pub session_ttl_days: i64,
    pub turn_timeout_secs: u64,
    pub tool_call_timeout_secs: u64,
    pub tool_loop_max_iterations: usize,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            server: server::ServerConfig::from_env(),
            database: server::DatabaseConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
            rate_limit: server::RateLimitConfig::from_env(),
            oauth: server::OAuthConfig::from_env(),
            scheduler: server::SchedulerConfig::from_env(),
            viewer: server::ViewerConfig::from_env(),
            llm: llm::LlmConfig::from_env(),
            session_ttl_days: helpers::env_parsed("SESSION_TTL_DAYS", 30),
            turn_timeout_secs: helpers::env_parsed("TURN_TIMEOUT_SECS", 300),
            tool_call_timeout_secs: helpers::env_parsed("TOOL_CALL_TIMEOUT_SECS", 120),
            tool_loop_max_iterations: helpers::env_parsed("TOOL_LOOP_MAX_ITERATIONS", 16),
        }
    }

    pub fn bind_address(&self) -> String {
        self.server.bind_address()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
