//! Interfaces for systems this crate treats as external collaborators rather than reimplementing:
//! vault-backed encryption, durable document storage, blob storage, and a generic cache.
//!
//! Every orchestrator component that needs one of these takes a trait object (or `Arc<dyn
//! Trait>`) rather than a concrete client, so a caller can supply the real production
//! implementations without this crate depending on their transports.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Key-wrap/unwrap plus per-user content encryption. The orchestrator never persists plaintext
/// embed content beyond the short-lived in-memory cache it builds before handing off to this
/// service.
#[async_trait]
pub trait EncryptionService: Send + Sync {
    async fn encrypt_with_user_key(
        &self,
        vault_key_id: &str,
        plaintext: &Value,
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;

    async fn decrypt_with_user_key(
        &self,
        vault_key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// Durable document store for chats and embeds. Writes from this crate are asynchronous,
/// fire-and-forget dispatches onto a persistence queue — the orchestrator's own cache is the
/// source of truth for the lifetime of a session.
#[async_trait]
pub trait DirectusService: Send + Sync {
    async fn enqueue_persist_embed(
        &self,
        embed_id: &str,
        content: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn enqueue_persist_chat_message(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn enqueue_set_active_focus(
        &self,
        chat_id: &str,
        focus_id: Option<&str>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Signed-URL blob storage for binary assets (generated images, uploaded files referenced by a
/// skill result).
#[async_trait]
pub trait S3Service: Send + Sync {
    async fn signed_url(
        &self,
        object_key: &str,
        expires_in: Duration,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// Generic short-TTL cache backing the embed cache, pending-focus-activation records, and the
/// per-skill cancellation flags. Mirrors the cache-key schema's TTL semantics; callers pass the
/// TTL explicitly rather than this trait inferring one from the key.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Box<dyn std::error::Error + Send + Sync>>;

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn delete(&self, key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn add_to_set(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Whether a bare marker key exists at all — used for the per-skill cancellation flag and
    /// the already-completed-hash lookup.
    async fn exists(&self, key: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// Fully in-memory collaborator set used in tests and for local development. No encryption is
/// actually performed; this exists so orchestrator components can be exercised without wiring a
/// real vault, document store, or Redis instance.
pub mod in_memory {
    use super::*;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct InMemoryCache {
        entries: RwLock<std::collections::HashMap<String, Vec<u8>>>,
        sets: RwLock<std::collections::HashMap<String, HashSet<String>>>,
    }

    #[async_trait]
    impl Cache for InMemoryCache {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.entries.read().await.get(key).cloned())
        }

        async fn set(&self, key: &str, value: &[u8], _ttl: Duration) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.entries.write().await.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.entries.write().await.remove(key);
            Ok(())
        }

        async fn add_to_set(&self, key: &str, member: &str, _ttl: Duration) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.sets.write().await.entry(key.to_string()).or_default().insert(member.to_string());
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.entries.read().await.contains_key(key))
        }
    }

    /// No-op encryption used in tests: "ciphertext" is the JSON bytes themselves, scoped by
    /// `vault_key_id` only to catch accidental cross-key reuse in tests.
    pub struct PassthroughEncryption;

    #[async_trait]
    impl EncryptionService for PassthroughEncryption {
        async fn encrypt_with_user_key(&self, _vault_key_id: &str, plaintext: &Value) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(serde_json::to_vec(plaintext)?)
        }

        async fn decrypt_with_user_key(&self, _vault_key_id: &str, ciphertext: &[u8]) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
            Ok(serde_json::from_slice(ciphertext)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::in_memory::*;
    use super::*;

    #[tokio::test]
    async fn in_memory_cache_round_trips() {
        let cache = InMemoryCache::default();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(cache.exists("k").await.unwrap());
        cache.delete("k").await.unwrap();
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn passthrough_encryption_round_trips() {
        let enc = PassthroughEncryption;
        let original = serde_json::json!({"status": "processing"});
        let ciphertext = enc.encrypt_with_user_key("vault-1", &original).await.unwrap();
        let decrypted = enc.decrypt_with_user_key("vault-1", &ciphertext).await.unwrap();
        assert_eq!(decrypted, original);
    }
}
