// src/mcp/mod.rs
// Model Context Protocol (MCP) client implementation.
// Enables integration with external MCP servers for tools and resources.

pub mod protocol;
pub mod registry;
pub mod transport;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use protocol::{JsonRpcRequest, JsonRpcResponse, McpCapabilities, McpTool};
use transport::{McpTransport, StdioTransport};

/// MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_timeout() -> u64 {
    30000
}

/// MCP configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// Connected MCP server instance
pub struct McpServer {
    pub name: String,
    pub config: McpServerConfig,
    pub capabilities: Option<McpCapabilities>,
    pub tools: Vec<McpTool>,
    pub resources: Vec<protocol::McpResource>,
    pub prompts: Vec<protocol::McpPrompt>,
    transport: Box<dyn McpTransport + Send + Sync>,
    request_id: RwLock<i64>,
}

impl McpServer {
    /// Create a new MCP server connection
    pub async fn connect(config: McpServerConfig) -> Result<Self> {
        let transport: Box<dyn McpTransport + Send + Sync> = if let Some(command) = &config.command
        {
            info!("[MCP] Starting stdio server '{}': {}", config.name, command);
            let stdio = StdioTransport::spawn(command, &config.args, &config.env).await?;
            Box::new(stdio)
        } else if let Some(url) = &config.url {
            info!("[MCP] Connecting to HTTP server '{}': {}", config.name, url);
            let http = transport::HttpTransport::with_timeout(url, config.timeout_ms);
            Box::new(http)
        } else {
            anyhow::bail!("MCP server config must have either 'command' or 'url'");
        };

        let mut server = Self {
            name: config.name.clone(),
            config,
            capabilities: None,
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            transport,
            request_id: RwLock::new(0),
        };

        // Initialize the server
        server.initialize().await?;

        // Discover tools
        server.discover_tools().await?;

        // Discover resources if supported
        server.discover_resources().await?;

        // Discover prompts if supported
        server.discover_prompts().await?;

        Ok(server)
    }

    /// Get next request ID
    async fn next_id(&self) -> i64 {
        let mut id = self.request_id.write().await;
        *id += 1;
        *id
    }

    /// Send a JSON-RPC request and get response
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id().await;
        let request = JsonRpcRequest::new(id, method, params);

        debug!("[MCP:{}] -> {} (id={})", self.name, method, id);

        let request_json = serde_json::to_string(&request)?;
        let response_json = self.transport.send(&request_json).await?;
        let response: JsonRpcResponse = serde_json::from_str(&response_json)?;

        if let Some(error) = response.error {
            anyhow::bail!("MCP error {}: {}", error.code, error.message);
        }

        response.result.context("Empty result from MCP server")
    }

    /// Initialize the MCP connection
    async fn initialize(&mut self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "roots": { "listChanged": true }
            },
            "clientInfo": {
                "name": "relay-backend",
                "version": "1.0.0"
            }
        });

        let result = self.send_request("initialize", Some(params)).await?;

        // Parse capabilities
        if let Ok(caps) = serde_json::from_value::<McpCapabilities>(result.clone()) {
            self.capabilities = Some(caps);
        }

        // Send initialized notification
        let notif = JsonRpcRequest::notification("notifications/initialized", None);
        let notif_json = serde_json::to_string(&notif)?;
        let _ = self.transport.send(&notif_json).await; // Notification, ignore response

        info!(
            "[MCP:{}] Initialized (protocol: {})",
            self.name,
            result
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
        );

        Ok(())
    }

    /// Discover available tools from the server
    async fn discover_tools(&mut self) -> Result<()> {
        let result = self.send_request("tools/list", None).await?;

        if let Some(tools) = result.get("tools").and_then(|t| t.as_array()) {
            for tool_value in tools {
                if let Ok(tool) = serde_json::from_value::<McpTool>(tool_value.clone()) {
                    debug!("[MCP:{}] Found tool: {}", self.name, tool.name);
                    self.tools.push(tool);
                }
            }
        }

        info!(
            "[MCP:{}] Discovered {} tools",
            self.name,
            self.tools.len()
        );

        Ok(())
    }

    /// Call a tool on this server
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments
        });

        info!("[MCP:{}] Calling tool: {}", self.name, tool_name);
        let result = self.send_request("tools/call", Some(params)).await?;

        Ok(result)
    }

    /// Discover available resources from the server
    async fn discover_resources(&mut self) -> Result<()> {
        // Check if server supports resources
        let supports_resources = self
            .capabilities
            .as_ref()
            .map(|c| c.resources.is_some())
            .unwrap_or(false);

        if !supports_resources {
            debug!("[MCP:{}] Server does not advertise resource support", self.name);
            return Ok(());
        }

        let result = self.send_request("resources/list", None).await?;

        if let Some(resources) = result.get("resources").and_then(|r| r.as_array()) {
            for resource_value in resources {
                if let Ok(resource) =
                    serde_json::from_value::<protocol::McpResource>(resource_value.clone())
                {
                    debug!("[MCP:{}] Found resource: {}", self.name, resource.uri);
                    self.resources.push(resource);
                }
            }
        }

        info!(
            "[MCP:{}] Discovered {} resources",
            self.name,
            self.resources.len()
        );

        Ok(())
    }

    /// Discover available prompts from the server
    async fn discover_prompts(&mut self) -> Result<()> {
        // Check if server supports prompts
        let supports_prompts = self
            .capabilities
            .as_ref()
            .map(|c| c.prompts.is_some())
            .unwrap_or(false);

        if !supports_prompts {
            debug!("[MCP:{}] Server does not advertise prompt support", self.name);
            return Ok(());
        }

        let result = self.send_request("prompts/list", None).await?;

        if let Some(prompts) = result.get("prompts").and_then(|p| p.as_array()) {
            for prompt_value in prompts {
                if let Ok(prompt) =
                    serde_json::from_value::<protocol::McpPrompt>(prompt_value.clone())
                {
                    debug!("[MCP:{}] Found prompt: {}", self.name, prompt.name);
                    self.prompts.push(prompt);
                }
            }
        }

        info!(
            "[MCP:{}] Discovered {} prompts",
            self.name,
            self.prompts.len()
        );

        Ok(())
    }

    /// List available resources
    pub async fn list_resources(&self) -> Result<Vec<protocol::McpResource>> {
        Ok(self.resources.clone())
    }

    /// Read a resource by URI
    pub async fn read_resource(&self, uri: &str) -> Result<protocol::ResourceReadResult> {
        let params = serde_json::json!({
            "uri": uri
        });

        let result = self.send_request("resources/read", Some(params)).await?;
        serde_json::from_value(result).context("Failed to parse resource read result")
    }

    /// Subscribe to resource changes (if supported)
    pub async fn subscribe_resource(&self, uri: &str) -> Result<()> {
        let supports_subscribe = self
            .capabilities
            .as_ref()
            .and_then(|c| c.resources.as_ref())
            .map(|r| r.subscribe)
            .unwrap_or(false);

        if !supports_subscribe {
            anyhow::bail!("Server '{}' does not support resource subscriptions", self.name);
        }

        let params = serde_json::json!({ "uri": uri });
        self.send_request("resources/subscribe", Some(params)).await?;
        info!("[MCP:{}] Subscribed to resource: {}", self.name, uri);
        Ok(())
    }

    /// Unsubscribe from resource changes
    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<()> {
        let params = serde_json::json!({ "uri": uri });
        self.send_request("resources/unsubscribe", Some(params)).await?;
        info!("[MCP:{}] Unsubscribed from resource: {}", self.name, uri);
        Ok(())
    }

    /// List available prompts
    pub async fn list_prompts(&self) -> Result<Vec<protocol::McpPrompt>> {
        Ok(self.prompts.clone())
    }

    /// Get a prompt with resolved arguments
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: std::collections::HashMap<String, String>,
    ) -> Result<Value> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        self.send_request("prompts/get", Some(params)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mcp_config() {
        let json = r#"{
            "servers": [
                {
                    "name": "filesystem",
                    "command": "npx",
                    "args": ["-y", "@anthropic/mcp-server-filesystem"],
                    "env": {"HOME": "/home/user"}
                }
            ]
        }"#;

        let config: McpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].name, "filesystem");
        assert_eq!(config.servers[0].command, Some("npx".to_string()));
        assert_eq!(config.servers[0].args.len(), 2);
    }

    #[test]
    fn test_default_config() {
        let config = McpConfig::default();
        assert!(config.servers.is_empty());
    }
}
