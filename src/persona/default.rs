// src/persona/default.rs
//! The fallback system prompt used when a Role has no `systemPrompt` of
//! its own.
//!
//! This is the single source of truth for the default persona; the turn
//! orchestrator's prompt assembly step falls back to it and never
//! duplicates this text elsewhere.

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with access to a set of tools.

Use tools when they let you answer more accurately than guessing; otherwise answer directly. When a tool call fails, say so plainly and suggest what the user could try instead. Keep responses concise unless the user asks for detail."#;
