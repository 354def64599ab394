//! System tools for activating/deactivating focus mode.
//!
//! Activation is deferred and user-cancellable; deactivation is immediate. Both are dispatched
//! from the tool-calling loop when it sees `app_id == "system"`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::orchestrator::collaborators::{Cache, DirectusService};

/// Marker text yielded to the stream when activation is pending client confirmation. The loop
/// does not continue iterating after yielding this.
pub const AWAITING_FOCUS_MODE_CONFIRMATION: &str = "__awaiting_focus_mode_confirmation__";

const PENDING_ACTIVATION_TTL: Duration = Duration::from_secs(30);

/// Everything a deferred confirm task needs to resume the session with the focus prompt injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFocusActivation {
    pub chat_id: String,
    pub focus_id: String,
    pub focus_prompt: String,
    pub embed_id: String,
    pub message_id: String,
    pub user_id: String,
}

/// Write the pending-activation record and return the marker the loop should yield. Does not
/// itself schedule the deferred task; the caller (stream consumer) owns the work-queue handle.
pub async fn activate(
    cache: Arc<dyn Cache>,
    pending: &PendingFocusActivation,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let key = format!("pending_focus_activation:{}", pending.chat_id);
    let body = serde_json::to_vec(pending)?;
    cache.set(&key, &body, PENDING_ACTIVATION_TTL).await?;
    Ok(())
}

/// How long after activation the deferred confirm task should run: the client UI's countdown
/// plus a 1s buffer so the server never confirms before the client's own countdown completes.
pub fn confirm_delay(client_countdown: Duration) -> Duration {
    client_countdown + Duration::from_secs(1)
}

/// Run by the deferred-confirm worker once `confirm_delay` has elapsed and the client did not
/// cancel: set the active focus id on the chat, dispatch a persistence update, and clear the
/// pending-activation cache entry.
pub async fn confirm(
    cache: Arc<dyn Cache>,
    directus: Arc<dyn DirectusService>,
    chat_id: &str,
    focus_id: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    directus.enqueue_set_active_focus(chat_id, Some(focus_id)).await?;
    cache.delete(&format!("pending_focus_activation:{}", chat_id)).await?;
    Ok(())
}

/// Deactivation is immediate: clear the active focus id and dispatch a persistence update. The
/// caller builds the `{"status":"deactivated", ...}` tool response from the returned unit value.
pub async fn deactivate(
    cache: Arc<dyn Cache>,
    directus: Arc<dyn DirectusService>,
    chat_id: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    directus.enqueue_set_active_focus(chat_id, None).await?;
    cache.delete(&format!("pending_focus_activation:{}", chat_id)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_delay_adds_one_second_buffer_over_client_countdown() {
        assert_eq!(confirm_delay(Duration::from_secs(5)), Duration::from_secs(6));
    }
}
