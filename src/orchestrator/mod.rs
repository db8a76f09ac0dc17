// src/orchestrator/mod.rs
// Turn Orchestrator (C7) — the heart of the system. Drives one chat turn
// as an interleaved SSE stream of tokens and tool events, grounded on
// the teacher's `web/chat/stream.rs`: an mpsc channel fed by a spawned
// worker task, consumed by the axum handler as `async_stream::stream!`.
// This module owns only the worker side; `api/http/chat.rs` owns the
// axum/Sse plumbing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::CONFIG;
use crate::error::AppError;
use crate::llm::provider::{LlmProvider, Message as ProviderMessage, StreamEvent, ToolCallInfo};
use crate::mcp::registry::McpRegistry;
use crate::memory::MemoryService;
use crate::metrics;
use crate::persona::default::DEFAULT_SYSTEM_PROMPT;
use crate::role::RoleContext;
use crate::store::models::{Message as StoreMessage, ViewerFile};
use crate::store::Store;
use crate::utils::get_timestamp;

const HISTORY_LIMIT: i64 = 50;

/// Events emitted to the client over SSE. `Content` is the bare
/// `{content}` shape; everything else carries a `type` discriminant —
/// the mixed shape is produced by hand via `to_json` rather than a
/// single derive, since the two families don't share a tag field.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Content(String),
    ToolCall {
        name: String,
        args: Value,
    },
    ToolResult {
        tool_name: String,
        result: Value,
        server_id: Option<String>,
        accounts: Option<Vec<String>>,
        metadata: Option<Value>,
    },
    Info(String),
    MemoryTaskStarted,
    MemoryTaskCompleted(usize),
    Error(String),
    /// Sentinel consumed by the SSE layer to emit the literal `[DONE]`
    /// line rather than a JSON frame.
    StreamEnd,
}

impl TurnEvent {
    pub fn to_json(&self) -> Option<Value> {
        match self {
            TurnEvent::Content(content) => Some(json!({ "content": content })),
            TurnEvent::ToolCall { name, args } => Some(json!({
                "type": "tool_call",
                "toolCall": { "name": name, "args": args },
            })),
            TurnEvent::ToolResult {
                tool_name,
                result,
                server_id,
                accounts,
                metadata,
            } => Some(json!({
                "type": "tool_result",
                "toolName": tool_name,
                "result": result,
                "serverId": server_id,
                "accounts": accounts,
                "metadata": metadata,
            })),
            TurnEvent::Info(message) => Some(json!({ "type": "info", "message": message })),
            TurnEvent::MemoryTaskStarted => Some(json!({ "type": "memory_task", "status": "started" })),
            TurnEvent::MemoryTaskCompleted(count) => {
                Some(json!({ "type": "memory_task", "status": "completed", "count": count }))
            }
            TurnEvent::Error(message) => Some(json!({ "type": "error", "message": message })),
            TurnEvent::StreamEnd => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TurnParams {
    pub timezone: Option<String>,
    pub locale: Option<String>,
    pub viewer_file: Option<ViewerFile>,
}

pub struct TurnOrchestrator {
    store: Store,
    registry: Arc<McpRegistry>,
    memory: Arc<MemoryService>,
    provider: Arc<dyn LlmProvider>,
    busy_roles: Mutex<HashSet<String>>,
}

impl TurnOrchestrator {
    pub fn new(
        store: Store,
        registry: Arc<McpRegistry>,
        memory: Arc<MemoryService>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            store,
            registry,
            memory,
            provider,
            busy_roles: Mutex::new(HashSet::new()),
        }
    }

    fn try_acquire(&self, role_id: &str) -> bool {
        self.busy_roles.lock().insert(role_id.to_string())
    }

    fn release(&self, role_id: &str) {
        self.busy_roles.lock().remove(role_id);
    }

    /// Entry point for `POST /chat/stream`. `user_message` is the text
    /// of the turn's new user message; the caller does not persist it —
    /// persistence happens here so headless (C8) and streaming callers
    /// share one code path.
    pub async fn run_turn(
        &self,
        role_ctx: &RoleContext,
        user_message: &str,
        params: TurnParams,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        if !self.try_acquire(&role_ctx.role_id) {
            let _ = tx.send(TurnEvent::Error("role_busy".to_string())).await;
            let _ = tx.send(TurnEvent::StreamEnd).await;
            return;
        }

        let timeout = Duration::from_secs(CONFIG.turn_timeout_secs);
        let tx_timeout = tx.clone();
        let work = self.execute_turn(role_ctx, user_message, params, tx);
        if tokio::time::timeout(timeout, work).await.is_err() {
            warn!(role_id = %role_ctx.role_id, "turn exceeded timeout");
            let _ = tx_timeout.send(TurnEvent::Error("turn timed out".to_string())).await;
            let _ = tx_timeout.send(TurnEvent::StreamEnd).await;
        }

        self.release(&role_ctx.role_id);
    }

    /// Headless re-entry for the scheduled jobs runner (C8): runs the
    /// same algorithm, collects the concatenated assistant text instead
    /// of streaming it to a client, and surfaces the final error (if
    /// any) as `Err` instead of an SSE frame.
    pub async fn run_headless(&self, role_ctx: &RoleContext, synthesized_prompt: &str) -> anyhow::Result<String> {
        let (tx, mut rx) = mpsc::channel(256);
        self.run_turn(role_ctx, synthesized_prompt, TurnParams::default(), tx).await;

        let mut collected = String::new();
        let mut failure = None;
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Content(c) => collected.push_str(&c),
                TurnEvent::Error(message) => failure = Some(message),
                _ => {}
            }
        }

        match failure {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(collected),
        }
    }

    async fn execute_turn(&self, role_ctx: &RoleContext, user_message: &str, params: TurnParams, tx: mpsc::Sender<TurnEvent>) {
        if let Err(e) = self
            .store
            .save_message(&StoreMessage {
                id: Uuid::new_v4().to_string(),
                user_id: role_ctx.user_id.clone(),
                role_id: role_ctx.role_id.clone(),
                group_id: role_ctx.group_id.clone(),
                role: "user".to_string(),
                content: user_message.to_string(),
                created_at: get_timestamp(),
            })
            .await
        {
            let _ = tx.send(TurnEvent::Error(format!("failed to persist user message: {e}"))).await;
            let _ = tx.send(TurnEvent::StreamEnd).await;
            return;
        }

        let system = match self.build_system_prompt(role_ctx, &params, &tx).await {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.send(TurnEvent::Error(e.to_string())).await;
                let _ = tx.send(TurnEvent::StreamEnd).await;
                return;
            }
        };

        let history = match self.store.list_messages(&role_ctx.role_id, HISTORY_LIMIT, None).await {
            Ok(rows) => rows,
            Err(e) => {
                let _ = tx.send(TurnEvent::Error(format!("failed to load history: {e}"))).await;
                let _ = tx.send(TurnEvent::StreamEnd).await;
                return;
            }
        };

        let mut transcript: Vec<ProviderMessage> = history
            .iter()
            .map(|m| match m.role.as_str() {
                "assistant" => ProviderMessage::assistant(m.content.clone()),
                "system" => ProviderMessage::system(m.content.clone()),
                _ => ProviderMessage::user(m.content.clone()),
            })
            .collect();

        let catalog = match self.registry.tool_catalog(&role_ctx.user_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(role_id = %role_ctx.role_id, error = %e, "tool catalog unavailable, proceeding without tools");
                Vec::new()
            }
        };
        let tools = McpRegistry::catalog_to_openai_tools(&catalog);

        let mut round_count = 0usize;
        let mut turn_memory_window: Vec<ProviderMessage> = Vec::new();

        loop {
            let mut stream = match self.provider.stream_with_tools(transcript.clone(), system.clone(), tools.clone()).await {
                Ok(s) => s,
                Err(e) => {
                    metrics::record_llm_call(self.provider.name(), false);
                    let _ = tx.send(TurnEvent::Error(format!("provider_error: {e}"))).await;
                    let _ = tx.send(TurnEvent::StreamEnd).await;
                    return;
                }
            };

            let mut line_buffer = String::new();
            let mut round_text = String::new();
            let mut tool_calls: Vec<(String, String, Value)> = Vec::new();
            let mut stream_failed = false;

            while let Some(event) = stream.next().await {
                match event {
                    Ok(StreamEvent::TextDelta { delta }) => {
                        round_text.push_str(&delta);
                        line_buffer.push_str(&delta);
                        while let Some(pos) = line_buffer.find('\n') {
                            let line: String = line_buffer.drain(..=pos).collect();
                            let _ = tx.send(TurnEvent::Content(line)).await;
                        }
                    }
                    Ok(StreamEvent::ToolCallComplete { id, name, arguments }) => {
                        tool_calls.push((id, name, arguments));
                    }
                    Ok(StreamEvent::ToolCallStart { .. }) | Ok(StreamEvent::ToolCallArgumentsDelta { .. }) => {}
                    Ok(StreamEvent::Done { input_tokens, output_tokens }) => {
                        metrics::record_llm_call(self.provider.name(), true);
                        metrics::record_tokens(input_tokens.max(0) as u64, output_tokens.max(0) as u64);
                    }
                    Ok(StreamEvent::Error { message }) => {
                        let _ = tx.send(TurnEvent::Error(message)).await;
                        stream_failed = true;
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(TurnEvent::Error(format!("provider_error: {e}"))).await;
                        stream_failed = true;
                        break;
                    }
                }
            }

            if !line_buffer.is_empty() {
                let _ = tx.send(TurnEvent::Content(std::mem::take(&mut line_buffer))).await;
            }

            if stream_failed {
                let _ = tx.send(TurnEvent::StreamEnd).await;
                return;
            }

            if tool_calls.is_empty() {
                if !round_text.is_empty() {
                    let msg = StoreMessage {
                        id: Uuid::new_v4().to_string(),
                        user_id: role_ctx.user_id.clone(),
                        role_id: role_ctx.role_id.clone(),
                        group_id: role_ctx.group_id.clone(),
                        role: "assistant".to_string(),
                        content: round_text.clone(),
                        created_at: get_timestamp(),
                    };
                    if let Err(e) = self.store.save_message(&msg).await {
                        error!(role_id = %role_ctx.role_id, error = %e, "failed to persist assistant message");
                    }
                    turn_memory_window.push(ProviderMessage::user(user_message.to_string()));
                    turn_memory_window.push(ProviderMessage::assistant(round_text));
                }
                break;
            }

            round_count += 1;
            if round_count > CONFIG.tool_loop_max_iterations {
                let _ = tx.send(TurnEvent::Error("tool_limit_exceeded".to_string())).await;
                let _ = tx.send(TurnEvent::StreamEnd).await;
                return;
            }

            if !round_text.is_empty() {
                let msg = StoreMessage {
                    id: Uuid::new_v4().to_string(),
                    user_id: role_ctx.user_id.clone(),
                    role_id: role_ctx.role_id.clone(),
                    group_id: role_ctx.group_id.clone(),
                    role: "assistant".to_string(),
                    content: round_text.clone(),
                    created_at: get_timestamp(),
                };
                if let Err(e) = self.store.save_message(&msg).await {
                    error!(role_id = %role_ctx.role_id, error = %e, "failed to persist pre-tool-call assistant message");
                }
            }

            let tool_call_infos: Vec<ToolCallInfo> = tool_calls
                .iter()
                .map(|(id, name, args)| ToolCallInfo {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: args.clone(),
                })
                .collect();
            transcript.push(ProviderMessage::assistant_with_tool_calls(round_text, tool_call_infos));

            for (call_id, name, args) in tool_calls {
                let _ = tx
                    .send(TurnEvent::ToolCall {
                        name: name.clone(),
                        args: args.clone(),
                    })
                    .await;

                let tool_started = std::time::Instant::now();
                let invocation = tokio::time::timeout(
                    Duration::from_secs(CONFIG.tool_call_timeout_secs),
                    self.registry.invoke_tool(&role_ctx.user_id, &catalog, &name, args),
                )
                .await;
                metrics::record_tool_execution(&name, matches!(invocation, Ok(Ok(_))), tool_started.elapsed().as_secs_f64());

                match invocation {
                    Ok(Ok(result)) => {
                        let metadata = result.result.get("roleSwitch").cloned().map(|rs| json!({ "roleSwitch": rs }));
                        let display_name = crate::mcp::registry::format_tool_name(&name);
                        let suffix = result
                            .accounts
                            .as_ref()
                            .and_then(|a| a.first())
                            .map(|email| format!(" · {email}"))
                            .unwrap_or_default();
                        let annotation = format!("*{display_name}*{suffix}");

                        let system_msg = StoreMessage {
                            id: Uuid::new_v4().to_string(),
                            user_id: role_ctx.user_id.clone(),
                            role_id: role_ctx.role_id.clone(),
                            group_id: role_ctx.group_id.clone(),
                            role: "system".to_string(),
                            content: annotation,
                            created_at: get_timestamp(),
                        };
                        if let Err(e) = self.store.save_message(&system_msg).await {
                            error!(role_id = %role_ctx.role_id, error = %e, "failed to persist tool annotation");
                        }
                        transcript.push(ProviderMessage::system(system_msg.content));

                        let _ = tx
                            .send(TurnEvent::ToolResult {
                                tool_name: name.clone(),
                                result: result.result.clone(),
                                server_id: Some(result.server_id),
                                accounts: result.accounts,
                                metadata,
                            })
                            .await;

                        transcript.push(ProviderMessage::tool_result(call_id, result.result.to_string()));
                    }
                    Ok(Err(AppError::OAuthRequired { provider, account_email })) => {
                        let _ = tx
                            .send(TurnEvent::Error(
                                json!({ "kind": "oauth_required", "provider": provider, "accountEmail": account_email }).to_string(),
                            ))
                            .await;
                        let _ = tx.send(TurnEvent::StreamEnd).await;
                        return;
                    }
                    Ok(Err(AppError::ToolFailed { tool_name, detail })) => {
                        let error_payload = json!({ "error": detail });
                        let _ = tx
                            .send(TurnEvent::ToolResult {
                                tool_name: tool_name.clone(),
                                result: error_payload.clone(),
                                server_id: None,
                                accounts: None,
                                metadata: None,
                            })
                            .await;
                        transcript.push(ProviderMessage::tool_result(call_id, error_payload.to_string()));
                    }
                    Ok(Err(e)) => {
                        let _ = tx.send(TurnEvent::Error(e.to_string())).await;
                        let _ = tx.send(TurnEvent::StreamEnd).await;
                        return;
                    }
                    Err(_elapsed) => {
                        let payload = json!({ "error": "tool call timed out" });
                        transcript.push(ProviderMessage::tool_result(call_id, payload.to_string()));
                        let _ = tx
                            .send(TurnEvent::ToolResult {
                                tool_name: name.clone(),
                                result: payload,
                                server_id: None,
                                accounts: None,
                                metadata: None,
                            })
                            .await;
                    }
                }
            }
        }

        let _ = tx.send(TurnEvent::MemoryTaskStarted).await;
        let memory = self.memory.clone();
        let role_id = role_ctx.role_id.clone();
        let tx_memory = tx.clone();
        tokio::spawn(async move {
            let count = memory.extract_background(role_id, turn_memory_window).await;
            let _ = tx_memory.send(TurnEvent::MemoryTaskCompleted(count)).await;
            let _ = tx_memory.send(TurnEvent::StreamEnd).await;
        });
    }

    async fn build_system_prompt(
        &self,
        role_ctx: &RoleContext,
        params: &TurnParams,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> anyhow::Result<String> {
        let mut parts = Vec::new();

        if let Ok(overview) = self.memory.overview(&role_ctx.role_id).await {
            if let Some(text) = overview.overview {
                parts.push(format!("What you remember about this user:\n{text}"));
            }
        }

        parts.push(
            role_ctx
                .role
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        );

        if let Some(file) = &params.viewer_file {
            match &file.absolute_path {
                Some(path) if tokio::fs::metadata(path).await.is_ok() => {
                    parts.push(format!(
                        "The user has attached a file: name={}, mimeType={}, absolutePath={}. \
                         Tools may read it directly from the local filesystem.",
                        file.name, file.mime_type, path
                    ));
                }
                _ => {
                    let _ = tx
                        .send(TurnEvent::Info("attached file is no longer available".to_string()))
                        .await;
                }
            }
        }

        if params.locale.is_some() || params.timezone.is_some() {
            let locale = params.locale.as_deref().unwrap_or("unspecified");
            let timezone = params.timezone.as_deref().unwrap_or("unspecified");
            parts.push(format!("User locale: {locale}. User timezone: {timezone}."));
        }

        Ok(parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::server::OAuthConfig;
    use crate::oauth::OAuthBroker;
    use crate::role::RoleResolver;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn chat(&self, _messages: Vec<ProviderMessage>, _system: String) -> anyhow::Result<crate::llm::provider::Response> {
            Ok(crate::llm::provider::Response {
                content: String::new(),
                model: "echo".to_string(),
                tokens: Default::default(),
            })
        }

        async fn chat_with_tools(
            &self,
            _messages: Vec<ProviderMessage>,
            _system: String,
            _tools: Vec<Value>,
        ) -> anyhow::Result<crate::llm::provider::ToolResponse> {
            unimplemented!()
        }

        async fn stream_with_tools(
            &self,
            _messages: Vec<ProviderMessage>,
            _system: String,
            _tools: Vec<Value>,
        ) -> anyhow::Result<crate::llm::provider::EventStream> {
            let events = vec![
                Ok(StreamEvent::TextDelta {
                    delta: "hello there\n".to_string(),
                }),
                Ok(StreamEvent::Done {
                    input_tokens: 1,
                    output_tokens: 2,
                }),
            ];
            Ok(Box::pin(futures_util::stream::iter(events)))
        }
    }

    async fn test_orchestrator() -> (TurnOrchestrator, RoleContext) {
        let store = Store::in_memory().await.unwrap();
        let oauth = Arc::new(OAuthBroker::new(store.clone(), OAuthConfig::from_env()));
        let registry = Arc::new(McpRegistry::new(store.clone(), oauth, StdDuration::from_secs(600)));
        let memory = Arc::new(MemoryService::new(store.clone(), Arc::new(EchoProvider)));
        let orchestrator = TurnOrchestrator::new(store.clone(), registry, memory, Arc::new(EchoProvider));

        let user = store
            .create_user(&Uuid::new_v4().to_string(), "turn-test@x.com", None, "individual")
            .await
            .unwrap();
        let resolver = RoleResolver::new(store.clone());
        let role = resolver.create_role(&user.id, "assistant", None).await.unwrap();
        let ctx = resolver.resolve(&user.id, &role.id).await.unwrap();

        (orchestrator, ctx)
    }

    #[tokio::test]
    async fn happy_turn_emits_content_then_memory_task_then_streamend() {
        let (orchestrator, ctx) = test_orchestrator().await;
        let (tx, mut rx) = mpsc::channel(64);

        orchestrator.run_turn(&ctx, "hello", TurnParams::default(), tx).await;

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }

        assert!(matches!(events.first(), Some(TurnEvent::Content(c)) if c.contains("hello there")));
        assert!(events.iter().any(|e| matches!(e, TurnEvent::MemoryTaskStarted)));
        assert!(events.iter().any(|e| matches!(e, TurnEvent::MemoryTaskCompleted(_))));
        assert!(matches!(events.last(), Some(TurnEvent::StreamEnd)));
    }

    #[tokio::test]
    async fn concurrent_turns_for_same_role_reject_second_as_busy() {
        let (orchestrator, ctx) = test_orchestrator().await;
        let orchestrator = Arc::new(orchestrator);

        let (tx1, mut rx1) = mpsc::channel(64);
        let o1 = orchestrator.clone();
        let ctx1 = ctx.clone();
        o1.try_acquire(&ctx1.role_id);

        let (tx2, mut rx2) = mpsc::channel(64);
        orchestrator.run_turn(&ctx, "second", TurnParams::default(), tx2).await;
        drop(tx1);
        drop(rx1);

        let first = rx2.recv().await.unwrap();
        assert!(matches!(first, TurnEvent::Error(m) if m == "role_busy"));
    }
}
