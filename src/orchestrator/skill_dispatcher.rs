//! Dispatches a single tool call to its owning app service over HTTP, with timeout, a single
//! timeout retry, and per-call cancellation via a cache flag.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cloudllm::http_client_pool::get_or_create_client;
use crate::orchestrator::collaborators::Cache;

/// Raised when a skill-task's cancellation flag fires mid-call. Distinct from session-level
/// revocation: only this one skill call is aborted, the outer response continues.
#[derive(Debug)]
pub struct SkillCancelled;

impl std::fmt::Display for SkillCancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "skill call cancelled by cache signal")
    }
}

impl std::error::Error for SkillCancelled {}

/// One flattened result row as returned by an app skill, with the dispatcher's classification
/// of the overall shape.
#[derive(Debug, Clone)]
pub enum SkillResult {
    /// Grouped per-request rows, e.g. `{"results": [{"id": "1", "results": [...]}], "provider": ...}`.
    Composite {
        raw: Value,
        flattened_rows: Vec<Value>,
        ignore_fields_for_inference: Option<Vec<String>>,
    },
    /// A single flat result list, non-composite skills.
    Simple {
        raw: Value,
        rows: Vec<Value>,
        ignore_fields_for_inference: Option<Vec<String>>,
    },
    /// `{"status": "processing", "task_id"/"task_ids": ...}` — an out-of-band job owns the
    /// placeholder from here on; the loop must not create any further embed update for this call.
    Async { task_ids: Vec<String> },
    /// `{"status": "error", "error": ...}` — never charged.
    Error { message: String },
}

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Dispatch one tool call's normalized arguments to `app-<app_id>:8000/skills/<skill_id>`.
pub async fn execute(
    app_id: &str,
    skill_id: &str,
    arguments: &Value,
    timeout: Duration,
    chat_id: &str,
    message_id: &str,
    user_id: &str,
    skill_task_id: &str,
    cache: Arc<dyn Cache>,
) -> Result<SkillResult, Box<dyn std::error::Error + Send + Sync>> {
    let base_url = format!("http://app-{}:8000", app_id);
    let url = format!("{}/skills/{}", base_url, skill_id);
    let body = serde_json::json!({
        "input_data": arguments,
        "parameters": {},
        "context": {
            "chat_id": chat_id,
            "message_id": message_id,
            "skill_task_id": skill_task_id,
        },
    });

    match dispatch_once(&base_url, &url, &body, timeout, user_id, skill_task_id, cache.clone()).await {
        Ok(response) => Ok(classify(response)),
        Err(DispatchError::Cancelled) => Ok(SkillResult::Error {
            message: "cancelled".to_string(),
        }),
        Err(DispatchError::Timeout) => {
            // Single retry on timeout, with a fresh connection pool entry to rotate transient
            // egress state rather than reusing the socket that just timed out.
            match dispatch_once(&base_url, &url, &body, timeout, user_id, skill_task_id, cache).await {
                Ok(response) => Ok(classify(response)),
                Err(DispatchError::Cancelled) => Ok(SkillResult::Error {
                    message: "cancelled".to_string(),
                }),
                Err(other) => Ok(SkillResult::Error {
                    message: other.to_string(),
                }),
            }
        }
        Err(other) => Ok(SkillResult::Error {
            message: other.to_string(),
        }),
    }
}

enum DispatchError {
    Timeout,
    Cancelled,
    Http(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Timeout => write!(f, "skill call timed out"),
            DispatchError::Cancelled => write!(f, "skill call cancelled"),
            DispatchError::Http(msg) => write!(f, "{}", msg),
        }
    }
}

async fn dispatch_once(
    base_url: &str,
    url: &str,
    body: &Value,
    timeout: Duration,
    user_id: &str,
    skill_task_id: &str,
    cache: Arc<dyn Cache>,
) -> Result<Value, DispatchError> {
    let client = get_or_create_client(base_url);
    let cancel_key = format!("skill-task:{}:cancel", skill_task_id);

    let request = client
        .post(url)
        .header("X-External-User-ID", user_id)
        .header("X-API-Key-Name", "skillstream-core")
        .json(body)
        .send();

    let cancel_watch = async {
        loop {
            match cache.exists(&cancel_key).await {
                Ok(true) => return,
                _ => tokio::time::sleep(CANCEL_POLL_INTERVAL).await,
            }
        }
    };

    tokio::select! {
        result = tokio::time::timeout(timeout, request) => {
            match result {
                Ok(Ok(response)) => response
                    .json::<Value>()
                    .await
                    .map_err(|e| DispatchError::Http(e.to_string())),
                Ok(Err(e)) => Err(DispatchError::Http(e.to_string())),
                Err(_) => Err(DispatchError::Timeout),
            }
        }
        _ = cancel_watch => Err(DispatchError::Cancelled),
    }
}

fn classify(response: Value) -> SkillResult {
    if response.get("status").and_then(|s| s.as_str()) == Some("error") {
        let message = response
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("skill returned an error")
            .to_string();
        return SkillResult::Error { message };
    }

    if response.get("status").and_then(|s| s.as_str()) == Some("processing") {
        let task_ids = if let Some(ids) = response.get("task_ids").and_then(|v| v.as_array()) {
            ids.iter().filter_map(|v| v.as_str().map(String::from)).collect()
        } else if let Some(id) = response.get("task_id").and_then(|v| v.as_str()) {
            vec![id.to_string()]
        } else {
            vec![]
        };
        return SkillResult::Async { task_ids };
    }

    let ignore_fields_for_inference = response
        .get("ignore_fields_for_inference")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect());

    if let Some(groups) = response.get("results").and_then(|v| v.as_array()) {
        let is_grouped = groups.iter().all(|g| g.get("results").is_some());
        if is_grouped {
            let flattened_rows: Vec<Value> = groups
                .iter()
                .flat_map(|g| {
                    g.get("results")
                        .and_then(|r| r.as_array())
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();
            return SkillResult::Composite {
                raw: response.clone(),
                flattened_rows,
                ignore_fields_for_inference,
            };
        }
        return SkillResult::Simple {
            raw: response.clone(),
            rows: groups.clone(),
            ignore_fields_for_inference,
        };
    }

    SkillResult::Simple {
        raw: response.clone(),
        rows: vec![response],
        ignore_fields_for_inference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognizes_error_shape() {
        let response = serde_json::json!({"status": "error", "error": "app unavailable"});
        match classify(response) {
            SkillResult::Error { message } => assert_eq!(message, "app unavailable"),
            _ => panic!("expected Error"),
        }
    }

    #[test]
    fn classify_recognizes_async_shape_with_task_ids() {
        let response = serde_json::json!({"status": "processing", "task_ids": ["t1", "t2"]});
        match classify(response) {
            SkillResult::Async { task_ids } => assert_eq!(task_ids, vec!["t1", "t2"]),
            _ => panic!("expected Async"),
        }
    }

    #[test]
    fn classify_recognizes_composite_shape_and_flattens_rows() {
        let response = serde_json::json!({
            "results": [
                {"id": "1", "results": [{"title": "a"}, {"title": "b"}]},
                {"id": "2", "results": [{"title": "c"}]}
            ],
            "provider": "brave",
        });
        match classify(response) {
            SkillResult::Composite { flattened_rows, .. } => assert_eq!(flattened_rows.len(), 3),
            _ => panic!("expected Composite"),
        }
    }

    #[test]
    fn classify_falls_back_to_simple_for_flat_results_list() {
        let response = serde_json::json!({"results": [{"reminder_id": "r1"}]});
        match classify(response) {
            SkillResult::Simple { rows, .. } => assert_eq!(rows.len(), 1),
            _ => panic!("expected Simple"),
        }
    }
}
