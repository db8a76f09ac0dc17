// src/llm/provider/stream.rs
// Stream event types for LLM SSE streaming, and the parser for an
// OpenAI-chat-completions-compatible `data: <json>` stream.

use serde_json::Value;

#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta {
        delta: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallArgumentsDelta {
        id: String,
        delta: String,
    },
    ToolCallComplete {
        id: String,
        name: String,
        arguments: Value,
    },
    Done {
        input_tokens: i64,
        output_tokens: i64,
    },
    Error {
        message: String,
    },
}

/// Accumulates per-index tool-call deltas until a `finish_reason` closes
/// them out, matching how OpenAI chat-completions streams tool calls:
/// the function name usually arrives whole in the first delta for an
/// index, arguments arrive incrementally.
#[derive(Default)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub started: bool,
}

pub fn parse_sse_data_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
}

pub fn parse_chunk(data: &str) -> Option<Value> {
    if data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_data_prefix() {
        assert_eq!(parse_sse_data_line("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data_line(": comment"), None);
        assert_eq!(parse_sse_data_line(""), None);
    }

    #[test]
    fn done_sentinel_has_no_chunk() {
        assert!(parse_chunk("[DONE]").is_none());
    }
}
