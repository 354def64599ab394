//! Redis-compatible pub/sub wrapper with this crate's channel-naming conventions and JSON framing.
//!
//! Every public method here maps one logical event to one channel and one JSON payload shape,
//! per the external-interfaces table. Publish failures are logged and surfaced as
//! [`crate::orchestrator::errors::OrchestratorError::EventPublisherUnavailable`] to the caller,
//! who decides whether a given event is load-bearing enough to propagate.

use redis::AsyncCommands;
use serde::Serialize;
use serde_json::Value;

use crate::orchestrator::errors::OrchestratorError;

/// Thin wrapper around a `redis` connection manager, constructed once per process and cloned
/// cheaply (the underlying connection manager is itself `Clone` and handles reconnection).
pub struct EventPublisher {
    manager: redis::aio::ConnectionManager,
}

impl EventPublisher {
    pub async fn connect(redis_url: &str) -> Result<Self, OrchestratorError> {
        let client = redis::Client::open(redis_url).map_err(|e| OrchestratorError::EventPublisherUnavailable {
            cause: e.to_string(),
        })?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| OrchestratorError::EventPublisherUnavailable { cause: e.to_string() })?;
        Ok(Self { manager })
    }

    async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<(), OrchestratorError> {
        let body = serde_json::to_string(payload).map_err(|e| OrchestratorError::EventPublisherUnavailable {
            cause: format!("failed to serialize payload for {}: {}", channel, e),
        })?;
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, body)
            .await
            .map_err(|e| OrchestratorError::EventPublisherUnavailable { cause: e.to_string() })
    }

    /// `chat_stream::<chat_id>` — content chunk or final marker.
    pub async fn publish_chunk(&self, chat_id: &str, payload: &Value) -> Result<(), OrchestratorError> {
        self.publish_json(&format!("chat_stream::{}", chat_id), payload).await
    }

    /// `ai_typing_indicator_events::<user_id_hash>` — skill execution status.
    pub async fn publish_skill_status(&self, user_id_hash: &str, payload: &Value) -> Result<(), OrchestratorError> {
        self.publish_json(&format!("ai_typing_indicator_events::{}", user_id_hash), payload).await
    }

    /// `ai_message_persisted::<user_id_hash>` — assistant message persistence event.
    pub async fn publish_message_persisted(&self, user_id_hash: &str, payload: &Value) -> Result<(), OrchestratorError> {
        self.publish_json(&format!("ai_message_persisted::{}", user_id_hash), payload).await
    }

    /// `websocket:user:<user_id_hash>` — embed placeholder/update pushes, focus-dialog dismissal.
    pub async fn publish_user_socket(&self, user_id_hash: &str, payload: &Value) -> Result<(), OrchestratorError> {
        self.publish_json(&format!("websocket:user:{}", user_id_hash), payload).await
    }

    /// `user_cache_events:<user_id>` — only used by the app-settings/memories dismiss flow.
    pub async fn publish_user_cache_event(&self, user_id: &str, payload: &Value) -> Result<(), OrchestratorError> {
        self.publish_json(&format!("user_cache_events:{}", user_id), payload).await
    }
}

/// Tracks, per embed id, whether a terminal `send_embed_data` event was already emitted inside
/// the *current* update call — so the caller knows not to also emit a duplicate `embed_update`
/// for the same write per the event-publisher's no-double-delivery rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct FromPlaceholder(bool);

impl FromPlaceholder {
    pub fn yes() -> Self {
        FromPlaceholder(true)
    }

    pub fn no() -> Self {
        FromPlaceholder(false)
    }

    pub fn should_suppress_embed_update(&self) -> bool {
        self.0
    }
}

/// Whether events should be suppressed for this caller. External-API callers still receive
/// chunks via their poll channel but never skill-status or typing-indicator events.
pub fn suppresses_skill_events(is_external_api_caller: bool) -> bool {
    is_external_api_caller
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_api_callers_suppress_skill_events() {
        assert!(suppresses_skill_events(true));
        assert!(!suppresses_skill_events(false));
    }

    #[test]
    fn from_placeholder_flag_round_trips() {
        assert!(FromPlaceholder::yes().should_suppress_embed_update());
        assert!(!FromPlaceholder::no().should_suppress_embed_update());
    }
}
