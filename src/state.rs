// src/state.rs
// Shared application state: one instance per process, constructed once
// at boot and handed to every handler behind an `Arc`. Replaces the
// teacher's sprawling tool-specific `AppState`: this system has far
// fewer moving parts, so every field here maps directly to one of the
// components in §4.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::auth::AuthService;
use crate::config::CONFIG;
use crate::jobs::JobsRunner;
use crate::llm::provider::{LlmProvider, OpenAiCompatibleProvider};
use crate::mcp::registry::McpRegistry;
use crate::memory::MemoryService;
use crate::oauth::OAuthBroker;
use crate::orchestrator::TurnOrchestrator;
use crate::role::RoleResolver;
use crate::store::Store;
use crate::utils::RateLimiter;
use crate::viewer::ViewerService;

const MCP_SESSION_IDLE_TIMEOUT_SECS: u64 = 15 * 60;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub auth_service: Arc<AuthService>,
    pub oauth_broker: Arc<OAuthBroker>,
    pub role_resolver: Arc<RoleResolver>,
    pub mcp_registry: Arc<McpRegistry>,
    pub memory_service: Arc<MemoryService>,
    pub llm_provider: Arc<dyn LlmProvider>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub viewer_service: Arc<ViewerService>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn new(store: Store) -> Result<Self> {
        let auth_service = Arc::new(AuthService::new(store.clone(), CONFIG.session_ttl_days));
        let oauth_broker = Arc::new(OAuthBroker::new(store.clone(), CONFIG.oauth.clone()));
        let role_resolver = Arc::new(RoleResolver::new(store.clone()));
        let mcp_registry = Arc::new(McpRegistry::new(
            store.clone(),
            oauth_broker.clone(),
            Duration::from_secs(MCP_SESSION_IDLE_TIMEOUT_SECS),
        ));

        let llm_provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(
            CONFIG.llm.base_url.clone(),
            CONFIG.llm.api_key.clone(),
            CONFIG.llm.model.clone(),
            CONFIG.llm.request_timeout_secs,
        ));

        let memory_service = Arc::new(MemoryService::new(store.clone(), llm_provider.clone()));
        let orchestrator = Arc::new(TurnOrchestrator::new(
            store.clone(),
            mcp_registry.clone(),
            memory_service.clone(),
            llm_provider.clone(),
        ));
        let viewer_service = Arc::new(ViewerService::new(CONFIG.viewer.clone(), oauth_broker.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(CONFIG.rate_limit.auth_requests_per_minute)?);

        Ok(Self {
            store,
            auth_service,
            oauth_broker,
            role_resolver,
            mcp_registry,
            memory_service,
            llm_provider,
            orchestrator,
            viewer_service,
            rate_limiter,
        })
    }

    /// Spawns the C8 jobs ticker, returning its shutdown sender.
    pub fn spawn_jobs_runner(&self) -> tokio::sync::watch::Sender<()> {
        let runner = Arc::new(JobsRunner::new(self.store.clone(), self.orchestrator.clone()));
        runner.spawn()
    }
}
