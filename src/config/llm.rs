// src/config/llm.rs
// Configuration for the concrete LlmProvider. The spec treats the provider
// wire protocol as out of scope beyond a small capability interface; this
// crate ships one concrete OpenAI-chat-completions-compatible provider so
// the turn orchestrator has something to drive in tests and in production
// against any compatible endpoint (OpenAI itself, or a self-hosted gateway).

use serde::{Deserialize, Serialize};

use super::helpers::{env_or, env_parsed};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_or("LLM_API_KEY", ""),
            base_url: env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            model: env_or("LLM_MODEL", "gpt-4o-mini"),
            request_timeout_secs: env_parsed("LLM_REQUEST_TIMEOUT_SECS", 120),
        }
    }
}
