//! Closed error and outcome types for the orchestrator.
//!
//! [`OrchestratorError`] is reserved for conditions that end a session's happy path entirely
//! (every error kind the design notes list as "terminal"). Per-tool-call failures the loop is
//! specified to recover from are represented as [`ToolOutcome`] values returned from fallible
//! functions, never as `Result::Err` — the loop's reducer pattern-matches on them and keeps
//! going, per the tool-calling loop's failure semantics.

use std::fmt;

/// The fixed, user-safe string substituted for any path that would otherwise leak a raw
/// technical error. Never alter the wording — clients may pattern-match on this exact string to
/// suppress LLM-token billing for the turn.
pub const STANDARDIZED_ERROR_MESSAGE: &str =
    "The AI service encountered an error while processing your request. Please try again in a moment.";

/// Errors that terminate an entire session rather than a single tool call.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Every model id in the fallback list failed to produce a stream.
    AllModelsFailed { last_cause: String },
    /// The LLM stream raised mid-turn after at least one model was successfully selected.
    StreamInterrupted { cause: String },
    /// The embed/session cache is unreachable.
    CacheUnavailable { cause: String },
    /// The Redis-compatible event publisher could not be reached.
    EventPublisherUnavailable { cause: String },
    /// A collaborator (encryption, directus, secrets) returned an unrecoverable error.
    CollaboratorFailed { collaborator: &'static str, cause: String },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::AllModelsFailed { last_cause } => {
                write!(f, "all fallback models failed, last cause: {}", last_cause)
            }
            OrchestratorError::StreamInterrupted { cause } => {
                write!(f, "llm stream interrupted: {}", cause)
            }
            OrchestratorError::CacheUnavailable { cause } => {
                write!(f, "cache unavailable: {}", cause)
            }
            OrchestratorError::EventPublisherUnavailable { cause } => {
                write!(f, "event publisher unavailable: {}", cause)
            }
            OrchestratorError::CollaboratorFailed { collaborator, cause } => {
                write!(f, "collaborator '{}' failed: {}", collaborator, cause)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

/// The outcome of attempting to execute a single resolved tool call.
///
/// Every variant here corresponds to one row of the error-handling design table; the tool loop
/// matches on this to decide what tool-response content to write back to the LLM and whether to
/// touch the budget/dedup/billing state.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// The skill ran and returned at least one non-error, non-cancelled result row.
    Success { result_json: serde_json::Value },
    /// A single skill failure; the LLM still gets a structured error it can respond around.
    SkillError { message: String },
    /// The per-skill cancellation signal fired mid-call.
    Cancelled,
    /// Executing this call would cross the hard skill-call budget.
    SkippedBudget,
    /// An identical `(app_id, skill_id, args)` triple already completed earlier this session.
    AlreadyCompleted { previous_embed_id: String },
    /// Tool-argument JSON failed to parse.
    ArgumentParseError { message: String },
    /// The resolver could not map the LLM-supplied name to a known `(app_id, skill_id)`.
    UnknownTool {
        requested_name: String,
        available_tools: Vec<String>,
    },
    /// The call targeted an async skill; an out-of-band job owns the placeholder from here on.
    Async { task_ids: Vec<String> },
}

impl ToolOutcome {
    /// Whether this outcome should increment the session's skill-call counter (§3 invariant:
    /// only non-empty, non-all-error results count).
    pub fn counts_toward_budget(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. } | ToolOutcome::Async { .. })
    }

    /// Whether this outcome should trigger a billing POST (§8 testable property 7).
    pub fn is_billable(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_success_and_async_count_toward_budget() {
        assert!(ToolOutcome::Success { result_json: serde_json::json!({}) }.counts_toward_budget());
        assert!(ToolOutcome::Async { task_ids: vec![] }.counts_toward_budget());
        assert!(!ToolOutcome::Cancelled.counts_toward_budget());
        assert!(!ToolOutcome::SkillError { message: "x".into() }.counts_toward_budget());
    }

    #[test]
    fn only_success_is_billable() {
        assert!(ToolOutcome::Success { result_json: serde_json::json!({}) }.is_billable());
        assert!(!ToolOutcome::Cancelled.is_billable());
        assert!(!ToolOutcome::AlreadyCompleted { previous_embed_id: "e1".into() }.is_billable());
    }
}
