// src/memory/mod.rs
// Per-role insight store (C6): extraction from conversation, semantic
// overview, natural-language remove/edit. All model-dependent ops share
// C7's provider abstraction but run deterministic, low-temperature
// prompts and are never on the SSE hot path — extraction in particular
// is fired as a background task from the turn orchestrator and its
// failure is logged, never surfaced to the client.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::llm::provider::{LlmProvider, Message};
use crate::store::Store;
use crate::utils::sha256_hash;

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract durable facts worth remembering about the user from a conversation window. \
Return one atomic insight per line, no numbering, no commentary. An insight is a short, self-contained statement \
(e.g. \"Prefers terse code review feedback\"). If nothing durable is worth keeping, return an empty response.";

const OVERVIEW_SYSTEM_PROMPT: &str = "You narratively summarize a list of remembered facts about a user into a short \
markdown paragraph a different assistant could use as context. Do not invent facts not present in the list.";

const SELECT_SYSTEM_PROMPT: &str = "You are given a numbered list of remembered facts and a natural-language selection \
description. Return the numbers (one per line, no other text) of facts that match the selection. If none match, \
return nothing.";

const EDIT_SYSTEM_PROMPT: &str = "You rewrite a remembered fact per an editing instruction. Return only the new fact \
text, no commentary.";

#[derive(Debug, Clone, Serialize)]
pub struct MemoryOverview {
    pub overview: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveResult {
    pub removed: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditResult {
    pub updated: Vec<String>,
    pub count: usize,
}

pub struct MemoryService {
    store: Store,
    provider: Arc<dyn LlmProvider>,
}

impl MemoryService {
    pub fn new(store: Store, provider: Arc<dyn LlmProvider>) -> Self {
        Self { store, provider }
    }

    /// Asks the model for atomic insight strings from `recent_messages`
    /// and inserts each with content-hash dedupe. Returns the count of
    /// newly inserted (non-duplicate) insights.
    pub async fn extract(&self, role_id: &str, recent_messages: &[Message]) -> Result<usize> {
        if recent_messages.is_empty() {
            return Ok(0);
        }

        let transcript = recent_messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let response = self
            .provider
            .chat(vec![Message::user(transcript)], EXTRACTION_SYSTEM_PROMPT.to_string())
            .await?;

        let mut inserted = 0;
        for line in response.content.lines() {
            let insight = line.trim().trim_start_matches('-').trim();
            if insight.is_empty() {
                continue;
            }
            let hash = sha256_hash(insight);
            let id = Uuid::new_v4().to_string();
            if self.store.insert_insight_if_new(&id, role_id, insight, &hash).await? {
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    /// Background-task wrapper for `extract`: logs and swallows errors
    /// so a memory-extraction failure never surfaces to the user.
    pub async fn extract_background(self: Arc<Self>, role_id: String, recent_messages: Vec<Message>) -> usize {
        match self.extract(&role_id, &recent_messages).await {
            Ok(count) => count,
            Err(e) => {
                error!(role_id, error = %e, "memory extraction failed");
                0
            }
        }
    }

    pub async fn overview(&self, role_id: &str) -> Result<MemoryOverview> {
        let insights = self.store.list_insights(role_id).await?;
        if insights.is_empty() {
            return Ok(MemoryOverview { overview: None });
        }

        let listing = insights
            .iter()
            .map(|(_, content)| format!("- {content}"))
            .collect::<Vec<_>>()
            .join("\n");

        let response = self
            .provider
            .chat(vec![Message::user(listing)], OVERVIEW_SYSTEM_PROMPT.to_string())
            .await?;

        let overview = response.content.trim();
        Ok(MemoryOverview {
            overview: if overview.is_empty() {
                None
            } else {
                Some(overview.to_string())
            },
        })
    }

    pub async fn remove(&self, role_id: &str, selection_text: &str) -> Result<RemoveResult> {
        let matches = self.select_matches(role_id, selection_text).await?;
        let mut removed = Vec::with_capacity(matches.len());
        for (id, content) in &matches {
            self.store.delete_insight(id).await?;
            removed.push(content.clone());
        }
        let count = removed.len();
        info!(role_id, count, "removed memory insights");
        Ok(RemoveResult { removed, count })
    }

    pub async fn edit(&self, role_id: &str, selection_text: &str, instruction: &str) -> Result<EditResult> {
        let matches = self.select_matches(role_id, selection_text).await?;
        let mut updated = Vec::with_capacity(matches.len());
        for (id, content) in &matches {
            let prompt = format!("Fact: {content}\nInstruction: {instruction}");
            let response = self
                .provider
                .chat(vec![Message::user(prompt)], EDIT_SYSTEM_PROMPT.to_string())
                .await?;
            let new_content = response.content.trim();
            if new_content.is_empty() {
                continue;
            }
            let hash = sha256_hash(new_content);
            self.store.update_insight(id, new_content, &hash).await?;
            updated.push(new_content.to_string());
        }
        let count = updated.len();
        Ok(EditResult { updated, count })
    }

    pub async fn save_to_memory(&self, role_id: &str, text: &str) -> Result<()> {
        let hash = sha256_hash(text);
        let id = Uuid::new_v4().to_string();
        self.store.insert_insight_if_new(&id, role_id, text, &hash).await?;
        Ok(())
    }

    async fn select_matches(&self, role_id: &str, selection_text: &str) -> Result<Vec<(String, String)>> {
        let insights = self.store.list_insights(role_id).await?;
        if insights.is_empty() {
            return Ok(Vec::new());
        }

        let listing = insights
            .iter()
            .enumerate()
            .map(|(i, (_, content))| format!("{}. {content}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("Facts:\n{listing}\n\nSelection: {selection_text}");

        let response = self
            .provider
            .chat(vec![Message::user(prompt)], SELECT_SYSTEM_PROMPT.to_string())
            .await?;

        let mut matches = Vec::new();
        for line in response.content.lines() {
            let Ok(n) = line.trim().parse::<usize>() else { continue };
            if n >= 1 && n <= insights.len() {
                matches.push(insights[n - 1].clone());
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        reply: String,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn chat(&self, _messages: Vec<Message>, _system: String) -> Result<crate::llm::provider::Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(crate::llm::provider::Response {
                content: self.reply.clone(),
                model: "stub".to_string(),
                tokens: Default::default(),
            })
        }

        async fn chat_with_tools(
            &self,
            _messages: Vec<Message>,
            _system: String,
            _tools: Vec<Value>,
        ) -> Result<crate::llm::provider::ToolResponse> {
            unimplemented!()
        }

        async fn stream_with_tools(
            &self,
            _messages: Vec<Message>,
            _system: String,
            _tools: Vec<Value>,
        ) -> Result<crate::llm::provider::EventStream> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn extract_dedupes_by_content_hash() {
        let store = Store::in_memory().await.unwrap();
        let provider = Arc::new(StubProvider::new("Likes dark mode\nPrefers terse replies"));
        let memory = MemoryService::new(store, provider);

        let window = vec![Message::user("hi")];
        let first = memory.extract("role-1", &window).await.unwrap();
        assert_eq!(first, 2);

        let second = memory.extract("role-1", &window).await.unwrap();
        assert_eq!(second, 0, "identical insights must not double-insert");
    }

    #[tokio::test]
    async fn overview_is_empty_with_no_insights() {
        let store = Store::in_memory().await.unwrap();
        let provider = Arc::new(StubProvider::new("anything"));
        let memory = MemoryService::new(store, provider);

        let overview = memory.overview("role-1").await.unwrap();
        assert!(overview.overview.is_none());
    }

    #[tokio::test]
    async fn save_to_memory_is_directly_queryable_in_overview_input() {
        let store = Store::in_memory().await.unwrap();
        let provider = Arc::new(StubProvider::new("A narrative summary."));
        let memory = MemoryService::new(store, provider);

        memory.save_to_memory("role-1", "Uses Rust professionally").await.unwrap();
        let overview = memory.overview("role-1").await.unwrap();
        assert_eq!(overview.overview.as_deref(), Some("A narrative summary."));
    }
}
