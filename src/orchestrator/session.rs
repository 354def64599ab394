//! Core data model: the Session, its immutable preprocessing input, per-call tool records, and
//! the Embed lifecycle. One [`Session`] lives for exactly one assistant response.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::orchestrator::content_hash::hash_owner_id;

/// Why preprocessing decided the loop should not run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    HarmfulOrIllegal,
    Misuse,
    InsufficientCredits,
    LlmPreprocessingFailed,
}

/// Immutable input produced by the (out-of-scope) preprocessing stage.
#[derive(Debug, Clone)]
pub struct PreprocessingResult {
    pub primary_model_id: String,
    pub secondary_model_id: Option<String>,
    pub fallback_model_id: Option<String>,
    pub primary_model_display_name: String,
    pub response_temperature: f32,
    pub category: String,
    /// Preselected skills. Per the spec, an empty set is NOT "all" unless this field was never
    /// set at all — callers must distinguish `Some(vec![])` (no skills preselected) from a
    /// genuinely absent preselection, hence the outer `Option`.
    pub preselected_skills: Option<HashSet<String>>,
    pub active_focus_id: Option<String>,
    pub rejection_reason: Option<RejectionReason>,
    pub error_message: Option<String>,
    pub can_proceed: bool,
    pub app_settings_keys_to_load: Vec<String>,
}

impl PreprocessingResult {
    /// Whether a given `app-skill` pair survives preselection filtering. Per the spec, a
    /// missing preselection set means "all skills available"; an explicitly empty one means
    /// none are preselected.
    pub fn skill_is_preselected(&self, app_skill: &str) -> bool {
        match &self.preselected_skills {
            None => true,
            Some(set) => set.contains(app_skill),
        }
    }
}

/// One tool call as recorded for the session's dedup/budget bookkeeping.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub app_id: String,
    pub skill_id: String,
    pub arguments: serde_json::Value,
    pub content_hash: String,
    pub skill_task_id: String,
    pub placeholder_embed_ids: Vec<String>,
}

/// Embed type, closed per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedType {
    AppSkillUse,
    Website,
    Place,
    Event,
    Code,
    Image,
    FocusModeActivation,
}

/// Embed status, closed per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedStatus {
    Processing,
    Finished,
    Error,
    Cancelled,
}

/// A persistent, addressable unit of structured content referenced from a chat message by id.
#[derive(Debug, Clone)]
pub struct Embed {
    pub id: String,
    pub embed_type: EmbedType,
    pub status: EmbedStatus,
    pub parent_embed_id: Option<String>,
    pub child_embed_ids: Option<Vec<String>>,
    /// Decrypted/plaintext content tree, cached briefly server-side to allow in-place updates.
    pub content: serde_json::Value,
    pub chat_id_hash: Option<String>,
    pub message_id_hash: Option<String>,
    pub skill_task_id_hash: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub text_length_chars: usize,
}

impl Embed {
    pub fn new(id: impl Into<String>, embed_type: EmbedType, content: serde_json::Value) -> Self {
        let now = chrono::Utc::now();
        let text_length_chars = content.to_string().chars().count();
        Self {
            id: id.into(),
            embed_type,
            status: EmbedStatus::Processing,
            parent_embed_id: None,
            child_embed_ids: None,
            content,
            chat_id_hash: None,
            message_id_hash: None,
            skill_task_id_hash: None,
            created_at: now,
            updated_at: now,
            text_length_chars,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, EmbedStatus::Finished | EmbedStatus::Error)
    }
}

/// Running counters owned by a session for the lifetime of one assistant response.
#[derive(Debug, Default, Clone)]
pub struct SessionCounters {
    pub iterations: usize,
    pub skill_calls: usize,
    pub last_chunk_sequence: u64,
}

/// Everything needed to drive one assistant response, from the request boundary down to the
/// embed cache. Lives for the duration of a single [`crate::orchestrator::stream_consumer`] run.
pub struct Session {
    pub chat_id: String,
    pub message_id: String,
    pub user_id: String,
    pub user_id_hash: Option<String>,
    pub vault_key_id: String,
    pub mate_default_prompt: String,
    pub mate_assigned_apps: Option<HashSet<String>>,
    pub preprocessing: PreprocessingResult,
    pub fallback_model_ids: Vec<String>,
    pub is_external_api_caller: bool,
    cancel_rx: watch::Receiver<bool>,
    cancel_tx: watch::Sender<bool>,
    pub counters: SessionCounters,
    /// Hash -> embed id, for cross-iteration skill-call dedup.
    pub completed_calls: HashMap<String, String>,
    pub failed_embed_ids: HashSet<String>,
    started_at: Instant,
}

impl Session {
    pub fn new(
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
        user_id: impl Into<String>,
        vault_key_id: impl Into<String>,
        mate_default_prompt: impl Into<String>,
        preprocessing: PreprocessingResult,
    ) -> Self {
        let user_id = user_id.into();
        let user_id_hash = hash_owner_id(&user_id);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let fallback_model_ids = std::iter::once(preprocessing.primary_model_id.clone())
            .chain(preprocessing.secondary_model_id.clone())
            .chain(preprocessing.fallback_model_id.clone())
            .collect();
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            user_id,
            user_id_hash,
            vault_key_id: vault_key_id.into(),
            mate_default_prompt: mate_default_prompt.into(),
            mate_assigned_apps: None,
            preprocessing,
            fallback_model_ids,
            is_external_api_caller: false,
            cancel_rx,
            cancel_tx,
            counters: SessionCounters::default(),
            completed_calls: HashMap::new(),
            failed_embed_ids: HashSet::new(),
            started_at: Instant::now(),
        }
    }

    /// Signal revocation; the stream consumer observes this between chunks.
    pub fn revoke(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_revoked(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Would executing `additional_requests` more skill requests cross the hard limit? Per the
    /// spec this is a would-exceed check, not a strict precheck — the budget can legitimately be
    /// exceeded by up to `additional_requests - 1`.
    pub fn would_exceed_hard_limit(&self, additional_requests: usize, hard_limit: usize) -> bool {
        self.counters.skill_calls + additional_requests > hard_limit
    }

    pub fn has_crossed_soft_limit(&self, soft_limit: usize) -> bool {
        self.counters.skill_calls >= soft_limit
    }

    pub fn next_chunk_sequence(&mut self) -> u64 {
        self.counters.last_chunk_sequence += 1;
        self.counters.last_chunk_sequence
    }
}

/// Shared handle used by background tasks (URL validation, focus-mode confirm) that need to
/// reference session identity without taking ownership of the whole `Session`.
#[derive(Clone)]
pub struct SessionHandle {
    pub chat_id: Arc<str>,
    pub message_id: Arc<str>,
    pub user_id: Arc<str>,
    pub user_id_hash: Option<Arc<str>>,
}

impl From<&Session> for SessionHandle {
    fn from(s: &Session) -> Self {
        Self {
            chat_id: Arc::from(s.chat_id.as_str()),
            message_id: Arc::from(s.message_id.as_str()),
            user_id: Arc::from(s.user_id.as_str()),
            user_id_hash: s.user_id_hash.as_deref().map(Arc::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocessing() -> PreprocessingResult {
        PreprocessingResult {
            primary_model_id: "gpt-4.1".into(),
            secondary_model_id: Some("gpt-4.1-mini".into()),
            fallback_model_id: None,
            primary_model_display_name: "GPT-4.1".into(),
            response_temperature: 0.7,
            category: "general".into(),
            preselected_skills: None,
            active_focus_id: None,
            rejection_reason: None,
            error_message: None,
            can_proceed: true,
            app_settings_keys_to_load: vec![],
        }
    }

    #[test]
    fn missing_preselection_means_all_skills_available() {
        let p = preprocessing();
        assert!(p.skill_is_preselected("web-search"));
    }

    #[test]
    fn empty_preselection_means_no_skills_available() {
        let mut p = preprocessing();
        p.preselected_skills = Some(HashSet::new());
        assert!(!p.skill_is_preselected("web-search"));
    }

    #[test]
    fn would_exceed_hard_limit_uses_would_exceed_not_already_at() {
        let session = Session::new("chat-1", "msg-1", "user-1", "vault-1", "be helpful", preprocessing());
        assert!(!session.would_exceed_hard_limit(5, 5));
        assert!(session.would_exceed_hard_limit(6, 5));
    }

    #[test]
    fn revoke_is_observed_without_mutable_borrow() {
        let session = Session::new("chat-1", "msg-1", "user-1", "vault-1", "be helpful", preprocessing());
        assert!(!session.is_revoked());
        session.revoke();
        assert!(session.is_revoked());
    }

    #[test]
    fn chunk_sequence_is_monotonically_increasing() {
        let mut session = Session::new("chat-1", "msg-1", "user-1", "vault-1", "be helpful", preprocessing());
        let first = session.next_chunk_sequence();
        let second = session.next_chunk_sequence();
        assert!(second > first);
    }
}
