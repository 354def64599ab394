//! Shared utilities used across provider client implementations.
//!
//! Every concrete provider wrapper in [`crate::cloudllm::clients`] exposes an OpenAI-compatible
//! Chat Completions surface (directly, or via a compatibility proxy), so the wire-level work of
//! serialising messages and tools, posting the request, and parsing the response lives here once
//! instead of once per provider.

use crate::cloudllm::client_wrapper::{
    ChunkEvent, ChunkEventStream, Message, NativeToolCall, Role, ToolDefinition, UsageMetadata,
};
use futures_util::StreamExt;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// The single client instance keeps TLS sessions and DNS lookups warm, which significantly
    /// reduces latency when many concurrent requests are issued to upstream providers.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

fn wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System => serde_json::json!({"role": "system", "content": msg.content.as_deref()}),
            Role::User => serde_json::json!({"role": "user", "content": msg.content.as_deref()}),
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    serde_json::json!({"role": "assistant", "content": msg.content.as_deref()})
                } else {
                    let tool_calls: Vec<serde_json::Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {"name": tc.name, "arguments": tc.arguments_raw},
                            })
                        })
                        .collect();
                    serde_json::json!({
                        "role": "assistant",
                        "content": msg.content.as_deref(),
                        "tool_calls": tool_calls,
                    })
                }
            }
            Role::Tool => serde_json::json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content.as_deref(),
            }),
        })
        .collect()
}

fn wire_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema,
                },
            })
        })
        .collect()
}

fn chat_body(model: &str, messages: &[Message], tools: &[ToolDefinition], stream: bool) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": wire_messages(messages),
        "stream": stream,
    });
    if !tools.is_empty() {
        body["tools"] = serde_json::Value::Array(wire_tools(tools));
    }
    body
}

fn parse_usage(usage_obj: Option<&serde_json::Value>) -> Option<UsageMetadata> {
    let usage_obj = usage_obj?;
    let input = usage_obj.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let output = usage_obj
        .get("completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    Some(UsageMetadata::OpenAiCompatible {
        input_tokens: input,
        output_tokens: output,
    })
}

/// Call an OpenAI-compatible Chat Completions endpoint with native tool definitions.
///
/// Posts to `{base_url}/chat/completions` with an `Authorization: Bearer {api_key}` header and
/// parses the response into a [`Message`] plus any usage metadata, which is stashed in
/// `usage_slot` for [`ClientWrapper::get_last_usage`](crate::cloudllm::client_wrapper::ClientWrapper::get_last_usage).
pub async fn send_with_native_tools(
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    http_client: &reqwest::Client,
    usage_slot: &Mutex<Option<UsageMetadata>>,
) -> Result<Message, Box<dyn Error + Send + Sync>> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let body = chat_body(model, messages, tools, false);

    let resp = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        log::error!("send_with_native_tools: HTTP {} from {}: {}", status, url, text);
        return Err(format!("send_with_native_tools: HTTP {} — {}", status, text).into());
    }

    let parsed: serde_json::Value = serde_json::from_str(&text)?;
    if let Some(usage) = parse_usage(parsed.get("usage")) {
        *usage_slot.lock().await = Some(usage);
    }

    let choice_msg = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or("send_with_native_tools: no choices in response")?;

    let content = choice_msg
        .get("content")
        .and_then(|c| c.as_str())
        .map(|s| std::sync::Arc::<str>::from(s));

    let tool_calls: Vec<NativeToolCall> = choice_msg
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let arguments_raw = func.get("arguments")?.as_str().unwrap_or("{}").to_string();
                    Some(NativeToolCall {
                        id,
                        name,
                        arguments_raw,
                        provider_signature: tc.get("thought_signature").and_then(|s| s.as_str()).map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Message::assistant_tool_calls(content, tool_calls))
}

/// Stream an OpenAI-compatible Chat Completions request as a [`ChunkEventStream`].
///
/// Incremental tool-call argument deltas are buffered by index and only surfaced as a single
/// [`ChunkEvent::ToolCall`] once the stream signals `finish_reason` (the orchestrator needs
/// complete, parseable arguments, not partial JSON).
pub async fn stream_with_native_tools(
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    http_client: &reqwest::Client,
) -> Result<ChunkEventStream, Box<dyn Error + Send + Sync>> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let body = chat_body(model, messages, tools, true);

    let resp = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .header("Accept", "text/event-stream")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(format!("stream_with_native_tools: HTTP {} — {}", status, text).into());
    }

    let byte_stream = resp.bytes_stream();

    let event_stream = async_stream::stream! {
        // index -> (id, name, accumulated-arguments)
        let mut pending_tools: HashMap<u64, (String, String, String)> = HashMap::new();
        let mut leftover = String::new();
        let mut bytes = Box::pin(byte_stream);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(Box::new(e) as Box<dyn Error + Send + Sync>);
                    continue;
                }
            };
            leftover.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = leftover.find("\n\n") {
                let event = leftover[..pos].to_string();
                leftover.drain(..pos + 2);

                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        continue;
                    }
                    let parsed: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(usage) = parse_usage(parsed.get("usage")) {
                        yield Ok(ChunkEvent::Usage(usage));
                    }

                    let Some(choice) = parsed.get("choices").and_then(|c| c.get(0)) else { continue };
                    let delta = choice.get("delta").cloned().unwrap_or(serde_json::Value::Null);

                    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                        if !text.is_empty() {
                            yield Ok(ChunkEvent::Text(text.to_string()));
                        }
                    }
                    if let Some(thinking) = delta.get("reasoning_content").and_then(|c| c.as_str()) {
                        if !thinking.is_empty() {
                            yield Ok(ChunkEvent::Thinking(thinking.to_string()));
                        }
                    }

                    if let Some(deltas) = delta.get("tool_calls").and_then(|t| t.as_array()) {
                        for d in deltas {
                            let idx = d.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                            let entry = pending_tools.entry(idx).or_insert_with(|| (String::new(), String::new(), String::new()));
                            if let Some(id) = d.get("id").and_then(|v| v.as_str()) {
                                entry.0 = id.to_string();
                            }
                            if let Some(func) = d.get("function") {
                                if let Some(name) = func.get("name").and_then(|v| v.as_str()) {
                                    entry.1.push_str(name);
                                }
                                if let Some(args) = func.get("arguments").and_then(|v| v.as_str()) {
                                    entry.2.push_str(args);
                                }
                            }
                        }
                    }

                    let finished = choice
                        .get("finish_reason")
                        .and_then(|f| f.as_str())
                        .map(|f| f == "tool_calls" || f == "stop")
                        .unwrap_or(false);
                    if finished && !pending_tools.is_empty() {
                        let mut indices: Vec<u64> = pending_tools.keys().copied().collect();
                        indices.sort();
                        for idx in indices {
                            if let Some((id, name, args)) = pending_tools.remove(&idx) {
                                yield Ok(ChunkEvent::ToolCall(NativeToolCall {
                                    id,
                                    name,
                                    arguments_raw: if args.is_empty() { "{}".to_string() } else { args },
                                    provider_signature: None,
                                }));
                            }
                        }
                    }
                }
            }
        }
    };

    Ok(Box::pin(event_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_includes_stream_flag_and_tools() {
        let msgs = [Message::user("hi")];
        let tools = [ToolDefinition {
            name: "calculator".into(),
            description: "math".into(),
            parameters_schema: serde_json::json!({"type": "object"}),
        }];
        let body = chat_body("gpt-4.1", &msgs, &tools, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["function"]["name"], "calculator");
    }

    #[test]
    fn parse_usage_reads_prompt_and_completion_tokens() {
        let raw = serde_json::json!({"prompt_tokens": 12, "completion_tokens": 4});
        let usage = parse_usage(Some(&raw)).unwrap();
        assert_eq!(usage.total_tokens(), 16);
    }
}
