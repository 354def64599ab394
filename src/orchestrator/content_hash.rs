//! Narrow SHA-256 hashing helpers for privacy-sensitive ids.
//!
//! These back the hashed user/chat/app/skill ids threaded through every pub/sub payload and
//! the session's own `user_id_hash`. Each helper trims whitespace before hashing and returns
//! `None` instead of panicking on an empty or absent input, mirroring how callers elsewhere in
//! the orchestrator are expected to log-and-continue rather than fail a whole session over a
//! missing id.

use sha2::{Digest, Sha256};

fn sha256_hex(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        log::warn!("content_hash::sha256_hex: refusing to hash an empty value");
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(trimmed.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

/// Hash a raw owner/user id for use as a pub/sub channel key and in event payloads.
pub fn hash_owner_id(owner_id: &str) -> Option<String> {
    sha256_hex(owner_id)
}

/// Hash a content id (chat id, message id) for inclusion in externally-visible records.
pub fn hash_content_id(content_id: &str) -> Option<String> {
    sha256_hex(content_id)
}

/// Hash an app id for billing/usage rows.
pub fn hash_app_id(app_id: &str) -> Option<String> {
    sha256_hex(app_id)
}

/// Hash a skill id for billing/usage rows.
pub fn hash_skill_id(skill_id: &str) -> Option<String> {
    sha256_hex(skill_id)
}

/// Content hash for tool-call deduplication: `(app_id, skill_id, canonical-sorted-JSON
/// arguments)`. Key order is sorted so that two argument objects differing only in key order
/// hash identically.
pub fn sha256_of_canonical_json(app_id: &str, skill_id: &str, arguments: &serde_json::Value) -> String {
    let canonical = canonicalize(arguments);
    let mut hasher = Sha256::new();
    hasher.update(app_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(skill_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<_, _> = map.iter().collect();
            let parts: Vec<String> = sorted
                .iter()
                .map(|(k, v)| format!("{}:{}", k, canonicalize(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(hash_owner_id("user-123"), hash_owner_id("user-123"));
    }

    #[test]
    fn hashing_trims_whitespace() {
        assert_eq!(hash_owner_id("user-123"), hash_owner_id("  user-123  "));
    }

    #[test]
    fn empty_input_yields_none() {
        assert_eq!(hash_owner_id(""), None);
        assert_eq!(hash_skill_id("   "), None);
    }

    #[test]
    fn different_inputs_yield_different_hashes() {
        assert_ne!(hash_content_id("chat-1"), hash_content_id("chat-2"));
    }

    #[test]
    fn canonical_json_hash_is_order_independent() {
        let a = serde_json::json!({"when": "tomorrow 9am", "text": "water plants"});
        let b = serde_json::json!({"text": "water plants", "when": "tomorrow 9am"});
        assert_eq!(
            sha256_of_canonical_json("reminder", "set", &a),
            sha256_of_canonical_json("reminder", "set", &b)
        );
    }

    #[test]
    fn canonical_json_hash_differs_across_skills() {
        let args = serde_json::json!({"q": "rust"});
        assert_ne!(
            sha256_of_canonical_json("web", "search", &args),
            sha256_of_canonical_json("web", "fetch", &args)
        );
    }
}
