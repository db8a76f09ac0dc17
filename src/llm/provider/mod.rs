// src/llm/provider/mod.rs
// The small capability interface the core needs from an LLM provider:
// ingest a tool catalog and emit streamed tokens interleaved with
// tool_call events. The concrete wire protocol is implementation-defined
// (§9 Open Questions) — this crate ships one concrete provider speaking
// an OpenAI-chat-completions-compatible dialect.

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

pub mod openai_compatible;
pub mod stream;

pub use openai_compatible::OpenAiCompatibleProvider;
pub use stream::StreamEvent;

/// Tool call information for assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Simple message format for all providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallInfo>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: output.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallInfo>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: i64,
    pub output: i64,
    pub reasoning: i64,
}

/// Basic chat response (no tools) — used for C6's deterministic,
/// low-temperature memory operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub model: String,
    pub tokens: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub text_output: String,
    pub function_calls: Vec<FunctionCall>,
    pub tokens: TokenUsage,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Universal LLM provider interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deterministic, non-streaming chat — used by the memory service
    /// (C6) for extraction, overview, and edit operations.
    async fn chat(&self, messages: Vec<Message>, system: String) -> Result<Response>;

    /// Non-streaming tool-calling completion.
    async fn chat_with_tools(
        &self,
        messages: Vec<Message>,
        system: String,
        tools: Vec<Value>,
    ) -> Result<ToolResponse>;

    /// Streaming completion with tool calling — the turn orchestrator's
    /// primary entry point. Emits `TextDelta`/`ToolCallStart`/
    /// `ToolCallArgumentsDelta`/`ToolCallComplete`/`Done`/`Error`.
    async fn stream_with_tools(
        &self,
        messages: Vec<Message>,
        system: String,
        tools: Vec<Value>,
    ) -> Result<EventStream>;
}
