// src/mcp/registry.rs
// MCP Registry and multi-account session manager (C4). Holds the static
// predefined catalog plus the user-installed set from C1's `mcp_servers`,
// spawns/caches live sessions by `serverId` with idle-timeout eviction,
// and routes `invokeTool` to the right session, retrying once through
// the OAuth broker on an expired-token error.
//
// `mcp_servers` rows carry no `userId` column in the data model (§3);
// this registry stores an `ownerUserId` field inside the opaque `config`
// JSON instead, and filters the merged catalog to rows owned by the
// requesting user. Recorded as an Open Question resolution in DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::AppError;
use crate::mcp::protocol::McpTool;
use crate::mcp::{McpServer, McpServerConfig as ClientConfig};
use crate::oauth::OAuthBroker;
use crate::store::models::McpServerConfig;
use crate::store::Store;

/// One entry in the static, hard-coded catalog of servers this
/// deployment knows how to spawn.
#[derive(Debug, Clone)]
pub struct PredefinedServer {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub command: &'static str,
    pub args: &'static [&'static str],
    pub auth_provider: Option<&'static str>,
    pub api_key_env: Option<&'static str>,
    pub hidden: bool,
}

pub const PREDEFINED_SERVERS: &[PredefinedServer] = &[
    PredefinedServer {
        id: "gmail",
        name: "Gmail",
        description: "Search and read Gmail messages",
        command: "npx",
        args: &["-y", "@relay/mcp-gmail"],
        auth_provider: Some("google"),
        api_key_env: None,
        hidden: false,
    },
    PredefinedServer {
        id: "google-drive-mcp-lib",
        name: "Google Drive",
        description: "Search and preview Google Drive files",
        command: "npx",
        args: &["-y", "@relay/mcp-google-drive"],
        auth_provider: Some("google"),
        api_key_env: None,
        hidden: false,
    },
    PredefinedServer {
        id: "github",
        name: "GitHub",
        description: "Repositories, issues, and pull requests",
        command: "npx",
        args: &["-y", "@relay/mcp-github"],
        auth_provider: Some("github"),
        api_key_env: None,
        hidden: false,
    },
    PredefinedServer {
        id: "slack",
        name: "Slack",
        description: "Read and post Slack messages",
        command: "npx",
        args: &["-y", "@relay/mcp-slack"],
        auth_provider: Some("slack"),
        api_key_env: None,
        hidden: false,
    },
    PredefinedServer {
        id: "alphavantage",
        name: "Alpha Vantage",
        description: "Stock market quotes and fundamentals",
        command: "npx",
        args: &["-y", "@relay/mcp-alphavantage"],
        auth_provider: None,
        api_key_env: Some("ALPHAVANTAGE_API_KEY"),
        hidden: false,
    },
    PredefinedServer {
        id: "twelvedata",
        name: "Twelve Data",
        description: "Real-time and historical market data",
        command: "npx",
        args: &["-y", "@relay/mcp-twelvedata"],
        auth_provider: None,
        api_key_env: Some("TWELVEDATA_API_KEY"),
        hidden: false,
    },
];

fn find_predefined(base_id: &str) -> Option<&'static PredefinedServer> {
    PREDEFINED_SERVERS.iter().find(|p| p.id == base_id)
}

/// Persisted config JSON shape stored under `mcp_servers.config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstalledConfig {
    name: String,
    command: String,
    args: Vec<String>,
    enabled: bool,
    owner_user_id: String,
    #[serde(default)]
    account_email: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    auth_provider: Option<String>,
}

/// Installed-server view returned to API handlers.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledServerView {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub account_email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableServerView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub auth_provider: Option<String>,
    pub requires_api_key: bool,
}

#[derive(Debug, Default)]
pub struct AddPredefinedOpts {
    pub account_email: Option<String>,
    pub api_key: Option<String>,
}

/// A merged tool catalog entry: the exposed (possibly disambiguated)
/// name the model sees, and enough to route a call back.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub exposed_name: String,
    pub server_id: String,
    pub tool: McpTool,
}

/// Result of a dispatched tool call, enriched the way §4.7's
/// `tool_result` SSE frame needs.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocationResult {
    pub result: Value,
    pub server_id: String,
    pub accounts: Option<Vec<String>>,
}

struct LiveSession {
    server: McpServer,
    last_used: Mutex<Instant>,
}

/// Humanizes a tool name for display: insert spaces before uppercase
/// letters, replace `_` with space, lowercase, collapse whitespace.
pub fn format_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch == '_' {
            out.push(' ');
            continue;
        }
        if ch.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct McpRegistry {
    store: Store,
    oauth: Arc<OAuthBroker>,
    sessions: RwLock<HashMap<String, Arc<LiveSession>>>,
    idle_timeout: Duration,
}

impl McpRegistry {
    pub fn new(store: Store, oauth: Arc<OAuthBroker>, idle_timeout: Duration) -> Self {
        Self {
            store,
            oauth,
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn available_servers(&self) -> Vec<AvailableServerView> {
        PREDEFINED_SERVERS
            .iter()
            .filter(|p| !p.hidden)
            .map(|p| AvailableServerView {
                id: p.id.to_string(),
                name: p.name.to_string(),
                description: p.description.to_string(),
                auth_provider: p.auth_provider.map(|s| s.to_string()),
                requires_api_key: p.api_key_env.is_some(),
            })
            .collect()
    }

    pub async fn installed_for_user(&self, user_id: &str) -> Result<Vec<InstalledServerView>> {
        let rows = self.store.list_mcp_servers().await?;
        let mut out = Vec::new();
        for row in rows {
            let Ok(cfg) = serde_json::from_str::<InstalledConfig>(&row.config) else {
                continue;
            };
            if cfg.owner_user_id != user_id {
                continue;
            }
            out.push(InstalledServerView {
                id: row.id,
                name: cfg.name,
                enabled: cfg.enabled,
                account_email: cfg.account_email,
            });
        }
        Ok(out)
    }

    /// Clones a predefined entry, optionally stamps `accountEmail` into
    /// both the id and the config, then persists it. Does not eagerly
    /// spawn; the session starts lazily on first use in a turn.
    pub async fn add_predefined(
        &self,
        user_id: &str,
        base_id: &str,
        opts: AddPredefinedOpts,
    ) -> Result<InstalledServerView> {
        let predefined = find_predefined(base_id).ok_or_else(|| anyhow!("unknown predefined server: {base_id}"))?;

        if predefined.api_key_env.is_some() && opts.api_key.is_none() {
            return Err(anyhow!("server {base_id} requires an apiKey"));
        }

        let id = match &opts.account_email {
            Some(email) => format!("{base_id}~{email}"),
            None => base_id.to_string(),
        };

        let cfg = InstalledConfig {
            name: predefined.name.to_string(),
            command: predefined.command.to_string(),
            args: predefined.args.iter().map(|s| s.to_string()).collect(),
            enabled: true,
            owner_user_id: user_id.to_string(),
            account_email: opts.account_email.clone(),
            api_key: opts.api_key,
            auth_provider: predefined.auth_provider.map(|s| s.to_string()),
        };

        let config_json = serde_json::to_string(&cfg)?;
        self.store.upsert_mcp_server(&id, &config_json).await?;

        info!(server_id = %id, user_id, "mcp server added");

        Ok(InstalledServerView {
            id,
            name: cfg.name,
            enabled: cfg.enabled,
            account_email: cfg.account_email,
        })
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let row = self
            .store
            .get_mcp_server(id)
            .await?
            .ok_or_else(|| anyhow!("mcp server not found: {id}"))?;
        let mut cfg: InstalledConfig = serde_json::from_str(&row.config)?;
        cfg.enabled = enabled;
        self.store.upsert_mcp_server(id, &serde_json::to_string(&cfg)?).await?;
        if !enabled {
            self.evict(id).await;
        }
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.store.delete_mcp_server(id).await?;
        self.evict(id).await;
        Ok(())
    }

    async fn evict(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Sweeps sessions idle past the configured timeout. Run on a
    /// background tick by the caller; cheap to call often.
    pub async fn sweep_idle(&self) {
        let cutoff = Instant::now() - self.idle_timeout;
        let mut sessions = self.sessions.write().await;
        let mut dead = Vec::new();
        for (id, session) in sessions.iter() {
            if *session.last_used.lock().await < cutoff {
                dead.push(id.clone());
            }
        }
        for id in dead {
            sessions.remove(&id);
            info!(server_id = %id, "evicted idle mcp session");
        }
    }

    async fn get_or_spawn(&self, row: &McpServerConfig, cfg: &InstalledConfig) -> Result<Arc<LiveSession>> {
        if let Some(existing) = self.sessions.read().await.get(&row.id) {
            *existing.last_used.lock().await = Instant::now();
            return Ok(existing.clone());
        }

        let mut env = HashMap::new();
        if let Some(api_key) = &cfg.api_key {
            if let Some(predefined) = find_predefined(row.id.split('~').next().unwrap_or(&row.id)) {
                if let Some(key_env) = predefined.api_key_env {
                    env.insert(key_env.to_string(), api_key.clone());
                }
            }
        }

        let client_config = ClientConfig {
            name: cfg.name.clone(),
            command: Some(cfg.command.clone()),
            args: cfg.args.clone(),
            url: None,
            env,
            timeout_ms: 30_000,
        };

        let server = McpServer::connect(client_config)
            .await
            .with_context(|| format!("failed to spawn mcp server {}", row.id))?;

        let session = Arc::new(LiveSession {
            server,
            last_used: Mutex::new(Instant::now()),
        });
        self.sessions.write().await.insert(row.id.clone(), session.clone());
        Ok(session)
    }

    /// The merged tool catalog for a turn: every enabled server owned
    /// by `user_id`, tool names disambiguated with a `serverId__` prefix
    /// on collision.
    pub async fn tool_catalog(&self, user_id: &str) -> Result<Vec<CatalogEntry>> {
        let rows = self.store.list_mcp_servers().await?;
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut raw: Vec<(String, McpTool)> = Vec::new();

        for row in &rows {
            let Ok(cfg) = serde_json::from_str::<InstalledConfig>(&row.config) else {
                continue;
            };
            if cfg.owner_user_id != user_id || !cfg.enabled {
                continue;
            }
            let session = match self.get_or_spawn(row, &cfg).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(server_id = %row.id, error = %e, "mcp server unavailable, skipping from catalog");
                    continue;
                }
            };
            for tool in &session.server.tools {
                *by_name.entry(tool.name.clone()).or_insert(0) += 1;
                raw.push((row.id.clone(), tool.clone()));
            }
        }

        let mut catalog = Vec::with_capacity(raw.len());
        for (server_id, tool) in raw {
            let exposed_name = if by_name.get(&tool.name).copied().unwrap_or(0) > 1 {
                format!("{server_id}__{}", tool.name)
            } else {
                tool.name.clone()
            };
            catalog.push(CatalogEntry {
                exposed_name,
                server_id,
                tool,
            });
        }
        Ok(catalog)
    }

    pub fn catalog_to_openai_tools(catalog: &[CatalogEntry]) -> Vec<Value> {
        catalog
            .iter()
            .map(|entry| {
                let mut spec = entry.tool.to_openai_format(&entry.server_id);
                spec["function"]["name"] = Value::String(entry.exposed_name.clone());
                spec
            })
            .collect()
    }

    /// Locates the session owning `exposed_name` in a previously built
    /// catalog and dispatches the call, retrying once through the OAuth
    /// broker on an expired-token failure.
    pub async fn invoke_tool(
        &self,
        user_id: &str,
        catalog: &[CatalogEntry],
        exposed_name: &str,
        args: Value,
    ) -> Result<ToolInvocationResult, AppError> {
        let entry = catalog
            .iter()
            .find(|e| e.exposed_name == exposed_name)
            .ok_or_else(|| AppError::ToolFailed {
                tool_name: exposed_name.to_string(),
                detail: "unknown tool".to_string(),
            })?;

        let row = self
            .store
            .get_mcp_server(&entry.server_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::ToolFailed {
                tool_name: exposed_name.to_string(),
                detail: "server no longer installed".to_string(),
            })?;
        let cfg: InstalledConfig = serde_json::from_str(&row.config).map_err(|e| AppError::Internal(e.into()))?;

        let session = self
            .get_or_spawn(&row, &cfg)
            .await
            .map_err(|e| AppError::ToolFailed {
                tool_name: exposed_name.to_string(),
                detail: e.to_string(),
            })?;

        let accounts = cfg.account_email.clone().map(|e| vec![e]);

        match session.server.call_tool(&entry.tool.name, args.clone()).await {
            Ok(result) => Ok(ToolInvocationResult {
                result,
                server_id: entry.server_id.clone(),
                accounts,
            }),
            Err(e) if is_oauth_expired(&e) && cfg.auth_provider.is_some() => {
                let provider = cfg.auth_provider.clone().unwrap();
                self.oauth
                    .get_token(user_id, &provider, cfg.account_email.as_deref())
                    .await
                    .map_err(|_| AppError::OAuthRequired {
                        provider: provider.clone(),
                        account_email: cfg.account_email.clone(),
                    })?;

                session
                    .server
                    .call_tool(&entry.tool.name, args)
                    .await
                    .map(|result| ToolInvocationResult {
                        result,
                        server_id: entry.server_id.clone(),
                        accounts: cfg.account_email.clone().map(|e| vec![e]),
                    })
                    .map_err(|_| AppError::OAuthRequired {
                        provider,
                        account_email: cfg.account_email.clone(),
                    })
            }
            Err(e) => Err(AppError::ToolFailed {
                tool_name: exposed_name.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

fn is_oauth_expired(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("unauthorized") || msg.contains("401") || msg.contains("oauth") || msg.contains("token expired")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tool_name_humanizes_camel_case() {
        assert_eq!(format_tool_name("gmailSearchMessages"), "gmail search messages");
        assert_eq!(format_tool_name("list_files"), "list files");
    }

    #[tokio::test]
    async fn add_predefined_stamps_account_email_into_id() {
        let store = Store::in_memory().await.unwrap();
        let oauth = Arc::new(OAuthBroker::new(store.clone(), crate::config::server::OAuthConfig::from_env()));
        let registry = McpRegistry::new(store, oauth, Duration::from_secs(600));

        let installed = registry
            .add_predefined(
                "user-1",
                "gmail",
                AddPredefinedOpts {
                    account_email: Some("u@x.com".to_string()),
                    api_key: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(installed.id, "gmail~u@x.com");
        assert_eq!(installed.account_email.as_deref(), Some("u@x.com"));
    }

    #[tokio::test]
    async fn installed_servers_are_scoped_to_owner() {
        let store = Store::in_memory().await.unwrap();
        let oauth = Arc::new(OAuthBroker::new(store.clone(), crate::config::server::OAuthConfig::from_env()));
        let registry = McpRegistry::new(store, oauth, Duration::from_secs(600));

        registry
            .add_predefined("user-1", "gmail", AddPredefinedOpts::default())
            .await
            .unwrap();

        assert_eq!(registry.installed_for_user("user-1").await.unwrap().len(), 1);
        assert_eq!(registry.installed_for_user("user-2").await.unwrap().len(), 0);
    }
}
