// src/llm/provider/openai_compatible.rs
// Concrete LlmProvider speaking an OpenAI-chat-completions-compatible
// dialect (works against OpenAI itself or any gateway implementing the
// same wire format). Grounded on the teacher's GPT-5 provider: same
// reqwest client shape, same `/chat/completions` request/response
// parsing, same SSE line-scanning for the streaming path — generalized
// here to also decode `delta.tool_calls[]` and to return `StreamEvent`s
// instead of raw text.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::stream::{parse_chunk, parse_sse_data_line, StreamEvent, ToolCallAccumulator};
use super::{EventStream, FunctionCall, LlmProvider, Message, Response, TokenUsage, ToolResponse};

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: String, api_key: String, model: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    fn messages_json(system: &str, messages: &[Message]) -> Vec<Value> {
        let mut out = vec![serde_json::json!({"role": "system", "content": system})];
        for m in messages {
            let mut entry = serde_json::json!({"role": m.role, "content": m.content});
            if let Some(id) = &m.tool_call_id {
                entry["tool_call_id"] = serde_json::json!(id);
            }
            if let Some(calls) = &m.tool_calls {
                entry["tool_calls"] = serde_json::json!(calls
                    .iter()
                    .map(|c| serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()},
                    }))
                    .collect::<Vec<_>>());
            }
            out.push(entry);
        }
        out
    }

    fn tokens_from_usage(usage: &Value) -> TokenUsage {
        TokenUsage {
            input: usage["prompt_tokens"].as_i64().unwrap_or(0),
            output: usage["completion_tokens"].as_i64().unwrap_or(0),
            reasoning: usage["completion_tokens_details"]["reasoning_tokens"]
                .as_i64()
                .unwrap_or(0),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn chat(&self, messages: Vec<Message>, system: String) -> Result<Response> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::messages_json(&system, &messages),
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("provider returned {status}: {text}"));
        }

        let parsed: Value = response.json().await?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(Response {
            content,
            model: self.model.clone(),
            tokens: Self::tokens_from_usage(&parsed["usage"]),
        })
    }

    async fn chat_with_tools(
        &self,
        messages: Vec<Message>,
        system: String,
        tools: Vec<Value>,
    ) -> Result<ToolResponse> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::messages_json(&system, &messages),
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
            body["tool_choice"] = serde_json::json!("auto");
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("provider returned {status}: {text}"));
        }

        let parsed: Value = response.json().await?;
        let message = &parsed["choices"][0]["message"];
        let text_output = message["content"].as_str().unwrap_or("").to_string();

        let function_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let id = call["id"].as_str()?.to_string();
                        let name = call["function"]["name"].as_str()?.to_string();
                        let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                        let arguments = serde_json::from_str(raw_args).unwrap_or(Value::Null);
                        Some(FunctionCall { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ToolResponse {
            text_output,
            function_calls,
            tokens: Self::tokens_from_usage(&parsed["usage"]),
        })
    }

    async fn stream_with_tools(
        &self,
        messages: Vec<Message>,
        system: String,
        tools: Vec<Value>,
    ) -> Result<EventStream> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::messages_json(&system, &messages),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
            body["tool_choice"] = serde_json::json!("auto");
        }

        debug!(messages = messages.len(), tools = tools.len(), "opening streaming completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("streaming completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("provider returned {status}: {text}"));
        }

        let byte_stream = response.bytes_stream();

        let events = async_stream::stream! {
            let mut buffer = String::new();
            let mut accumulators: HashMap<i64, ToolCallAccumulator> = HashMap::new();
            let mut byte_stream = Box::pin(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        yield Ok(StreamEvent::Error { message: format!("stream error: {e}") });
                        return;
                    }
                };
                let Ok(text) = std::str::from_utf8(&bytes) else { continue };
                buffer.push_str(text);

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].to_string();
                    buffer.drain(..=pos);

                    let Some(data) = parse_sse_data_line(&line) else { continue };
                    let Some(json) = parse_chunk(data) else {
                        // [DONE] sentinel or non-JSON keepalive.
                        if data == "[DONE]" {
                            for (_, acc) in accumulators.drain() {
                                if acc.started {
                                    let arguments = serde_json::from_str(&acc.arguments).unwrap_or(Value::Null);
                                    yield Ok(StreamEvent::ToolCallComplete { id: acc.id, name: acc.name, arguments });
                                }
                            }
                            yield Ok(StreamEvent::Done { input_tokens: 0, output_tokens: 0 });
                        }
                        continue;
                    };

                    if let Some(usage) = json.get("usage").filter(|u| !u.is_null()) {
                        let tokens = Self::tokens_from_usage(usage);
                        yield Ok(StreamEvent::Done { input_tokens: tokens.input, output_tokens: tokens.output });
                        continue;
                    }

                    let choice = &json["choices"][0];
                    let delta = &choice["delta"];

                    if let Some(content) = delta["content"].as_str() {
                        if !content.is_empty() {
                            yield Ok(StreamEvent::TextDelta { delta: content.to_string() });
                        }
                    }

                    if let Some(tool_calls) = delta["tool_calls"].as_array() {
                        for tc in tool_calls {
                            let index = tc["index"].as_i64().unwrap_or(0);
                            let entry = accumulators.entry(index).or_default();

                            if let Some(id) = tc["id"].as_str() {
                                entry.id = id.to_string();
                            }
                            if let Some(name) = tc["function"]["name"].as_str() {
                                entry.name = name.to_string();
                                if !entry.started {
                                    entry.started = true;
                                    yield Ok(StreamEvent::ToolCallStart { id: entry.id.clone(), name: entry.name.clone() });
                                }
                            }
                            if let Some(args_delta) = tc["function"]["arguments"].as_str() {
                                entry.arguments.push_str(args_delta);
                                yield Ok(StreamEvent::ToolCallArgumentsDelta {
                                    id: entry.id.clone(),
                                    delta: args_delta.to_string(),
                                });
                            }
                        }
                    }

                    if choice["finish_reason"].as_str().is_some_and(|r| r != "null") {
                        for (_, acc) in accumulators.drain() {
                            if acc.started {
                                let arguments = serde_json::from_str(&acc.arguments).unwrap_or(Value::Null);
                                yield Ok(StreamEvent::ToolCallComplete { id: acc.id, name: acc.name, arguments });
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(events))
    }
}
