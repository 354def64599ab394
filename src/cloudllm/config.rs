//! Runtime configuration for the orchestrator.
//!
//! Every component that needs a knob (timeouts, budgets, the internal API base URL) takes a
//! `&RuntimeConfig` or an `Arc<RuntimeConfig>` at construction time rather than reading a
//! process-wide singleton. No TOML/YAML parsing is introduced — callers build this manually, or
//! via [`RuntimeConfig::from_env`] which overlays documented defaults with environment variables.
//!
//! # Example
//!
//! ```rust
//! use skillstream::cloudllm::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::default();
//! assert_eq!(config.max_iterations, 5);
//! assert_eq!(config.hard_limit_skill_calls, 5);
//! ```

use std::time::Duration;

/// Global configuration for one running orchestrator instance.
pub struct RuntimeConfig {
    /// Base URL for internal config/billing HTTP calls, e.g. `http://internal-api:8080`.
    pub internal_api_base: String,
    /// Shared-secret token sent as `X-Internal-Service-Token`. Missing is tolerated (warn-logged).
    pub internal_service_token: Option<String>,
    /// Connection string for the Redis-compatible pub/sub broker.
    pub redis_url: String,
    /// Per-call timeout for skill HTTP dispatch.
    pub skill_http_timeout: Duration,
    /// Per-call timeout for internal config/billing HTTP calls.
    pub internal_http_timeout: Duration,
    /// Conversation history truncation budget, estimated at 4 chars/token.
    pub conversation_token_budget: usize,
    /// Soft skill-call budget threshold; crossing it appends a research-budget warning.
    pub soft_limit_skill_calls: usize,
    /// Hard skill-call budget threshold; crossing it forces `tool_choice="none"`.
    pub hard_limit_skill_calls: usize,
    /// Outer tool-calling loop iteration cap.
    pub max_iterations: usize,
    /// Deferred focus-mode confirmation delay (client UI countdown plus a 1s buffer).
    pub focus_mode_countdown: Duration,
    /// Minimum credits charged for a skill call with no resolvable pricing.
    pub minimum_credits_charged: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            internal_api_base: "http://internal-api:8080".to_string(),
            internal_service_token: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            skill_http_timeout: Duration::from_secs(20),
            internal_http_timeout: Duration::from_secs(10),
            conversation_token_budget: 120_000,
            soft_limit_skill_calls: 3,
            hard_limit_skill_calls: 5,
            max_iterations: 5,
            focus_mode_countdown: Duration::from_secs(6),
            minimum_credits_charged: 1,
        }
    }
}

impl RuntimeConfig {
    /// Overlay [`RuntimeConfig::default`] with environment variables where present.
    ///
    /// A malformed override is logged with `log::warn!` and the default is kept; this never
    /// fails, matching the tolerant posture the orchestrator takes toward misconfiguration
    /// everywhere else (see `ERROR HANDLING DESIGN`).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("INTERNAL_API_BASE") {
            config.internal_api_base = v;
        }
        config.internal_service_token = std::env::var("INTERNAL_SERVICE_TOKEN").ok();
        if let Ok(v) = std::env::var("REDIS_URL") {
            config.redis_url = v;
        }

        Self::overlay_duration_secs("SKILL_HTTP_TIMEOUT_SECS", &mut config.skill_http_timeout);
        Self::overlay_duration_secs("INTERNAL_HTTP_TIMEOUT_SECS", &mut config.internal_http_timeout);
        Self::overlay_usize("CONVERSATION_TOKEN_BUDGET", &mut config.conversation_token_budget);
        Self::overlay_usize("SOFT_LIMIT_SKILL_CALLS", &mut config.soft_limit_skill_calls);
        Self::overlay_usize("HARD_LIMIT_SKILL_CALLS", &mut config.hard_limit_skill_calls);
        Self::overlay_usize("MAX_ITERATIONS", &mut config.max_iterations);
        Self::overlay_duration_secs("FOCUS_MODE_COUNTDOWN_SECS", &mut config.focus_mode_countdown);

        config
    }

    fn overlay_usize(var: &str, slot: &mut usize) {
        if let Ok(raw) = std::env::var(var) {
            match raw.parse::<usize>() {
                Ok(v) => *slot = v,
                Err(_) => log::warn!("RuntimeConfig::from_env: ignoring malformed {}={:?}", var, raw),
            }
        }
    }

    fn overlay_duration_secs(var: &str, slot: &mut Duration) {
        if let Ok(raw) = std::env::var(var) {
            match raw.parse::<u64>() {
                Ok(secs) => *slot = Duration::from_secs(secs),
                Err(_) => log::warn!("RuntimeConfig::from_env: ignoring malformed {}={:?}", var, raw),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_budgets() {
        let config = RuntimeConfig::default();
        assert_eq!(config.soft_limit_skill_calls, 3);
        assert_eq!(config.hard_limit_skill_calls, 5);
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.conversation_token_budget, 120_000);
    }
}
