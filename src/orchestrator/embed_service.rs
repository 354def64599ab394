//! Embed lifecycle: placeholder creation, result/error updates, composite parent/child
//! expansion, and resolve-in-content for embed references appearing in message bodies.
//!
//! Operation order for composite embeds is load-bearing: allocate the parent id, create its
//! children with `parent_embed_id` set, THEN write the parent with `embed_ids` populated.
//! Reordering this breaks key inheritance — a child's content is encrypted under the parent's
//! key, so the parent must already be addressable before any child write happens.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::orchestrator::collaborators::{Cache, EncryptionService};
use crate::orchestrator::content_hash::hash_content_id;
use crate::orchestrator::event_publisher::{EventPublisher, FromPlaceholder};
use crate::orchestrator::session::{Embed, EmbedStatus, EmbedType};
use crate::orchestrator::toon;

const EMBED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct EmbedService {
    cache: Arc<dyn Cache>,
    encryption: Arc<dyn EncryptionService>,
    publisher: Arc<EventPublisher>,
}

impl EmbedService {
    pub fn new(cache: Arc<dyn Cache>, encryption: Arc<dyn EncryptionService>, publisher: Arc<EventPublisher>) -> Self {
        Self { cache, encryption, publisher }
    }

    fn embed_key(embed_id: &str) -> String {
        format!("embed:{}", embed_id)
    }

    async fn write_embed(&self, vault_key_id: &str, embed: &Embed) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let encrypted = self.encryption.encrypt_with_user_key(vault_key_id, &embed.content).await?;
        self.cache.set(&Self::embed_key(&embed.id), &encrypted, EMBED_TTL).await?;
        self.cache
            .add_to_set(&format!("chat:{}:embed_ids", embed.chat_id_hash.as_deref().unwrap_or("")), &embed.id, EMBED_TTL)
            .await?;
        Ok(())
    }

    async fn read_embed_content(&self, vault_key_id: &str, embed_id: &str) -> Option<Value> {
        let cached = self.cache.get(&Self::embed_key(embed_id)).await.ok()??;
        self.encryption.decrypt_with_user_key(vault_key_id, &cached).await.ok()
    }

    async fn send_embed_data(
        &self,
        user_id_hash: &str,
        embed: &Embed,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::json!({
            "event": "send_embed_data",
            "type": format!("{:?}", embed.embed_type),
            "event_for_client": true,
            "payload": {
                "embed_id": embed.id,
                "type": format!("{:?}", embed.embed_type),
                "content": toon::encode(&toon::flatten_for_toon(&embed.content)),
                "status": format!("{:?}", embed.status),
                "text_length_chars": embed.text_length_chars,
                "createdAt": embed.created_at,
                "updatedAt": embed.updated_at,
                "parent_embed_id": embed.parent_embed_id,
                "embed_ids": embed.child_embed_ids,
            },
        });
        self.publisher.publish_user_socket(user_id_hash, &payload).await?;
        Ok(())
    }

    /// Create a `processing` placeholder for a skill's tool call, cache it encrypted, and push
    /// the plaintext TOON payload to the owning user's socket channel.
    pub async fn create_processing_embed_placeholder(
        &self,
        vault_key_id: &str,
        user_id_hash: &str,
        chat_id: &str,
        app_id: &str,
        skill_id: &str,
        skill_task_id: &str,
        metadata: Value,
    ) -> Result<Embed, Box<dyn std::error::Error + Send + Sync>> {
        let mut content = serde_json::json!({
            "app_id": app_id,
            "skill_id": skill_id,
            "status": "processing",
        });
        merge_metadata(&mut content, metadata);

        let mut embed = Embed::new(Uuid::new_v4().to_string(), EmbedType::AppSkillUse, content);
        embed.chat_id_hash = hash_content_id(chat_id);
        embed.skill_task_id_hash = hash_content_id(skill_task_id);

        self.write_embed(vault_key_id, &embed).await?;
        self.send_embed_data(user_id_hash, &embed).await?;
        Ok(embed)
    }

    /// Create a `processing` placeholder for an opening code fence.
    pub async fn create_code_embed_placeholder(
        &self,
        vault_key_id: &str,
        user_id_hash: &str,
        chat_id: &str,
        language: Option<&str>,
        filename: Option<&str>,
    ) -> Result<Embed, Box<dyn std::error::Error + Send + Sync>> {
        let content = serde_json::json!({
            "type": "code",
            "language": language,
            "code": "",
            "filename": filename,
            "status": "processing",
            "line_count": 0,
        });
        let mut embed = Embed::new(Uuid::new_v4().to_string(), EmbedType::Code, content);
        embed.chat_id_hash = hash_content_id(chat_id);

        self.write_embed(vault_key_id, &embed).await?;
        self.send_embed_data(user_id_hash, &embed).await?;
        Ok(embed)
    }

    /// Update a code embed's accumulated content. `check_cache_status=false` bypasses the
    /// dedup check for a caller that just wrote `finished` within the same operation.
    pub async fn update_code_embed_content(
        &self,
        vault_key_id: &str,
        user_id_hash: &str,
        embed_id: &str,
        code: &str,
        status: EmbedStatus,
        check_cache_status: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(mut cached) = self.read_embed_content(vault_key_id, embed_id).await else {
            log::warn!("update_code_embed_content: embed {} missing from cache, skipping", embed_id);
            return Ok(());
        };

        if check_cache_status
            && cached.get("status").and_then(|s| s.as_str()) == Some("finished")
            && status == EmbedStatus::Finished
        {
            return Ok(());
        }

        let line_count = if code.is_empty() { 0 } else { code.lines().count() };
        cached["code"] = Value::String(code.to_string());
        cached["line_count"] = Value::from(line_count);
        cached["status"] = Value::String(status_str(status).to_string());

        let mut embed = Embed::new(embed_id.to_string(), EmbedType::Code, cached);
        embed.status = status;

        self.write_embed(vault_key_id, &embed).await?;
        self.send_embed_data(user_id_hash, &embed).await?;
        Ok(())
    }

    /// Update an embed with the skill's results. Composite skills fan out into child embeds
    /// before the parent is written; non-composite skills rewrite a single embed in place.
    pub async fn update_embed_with_results(
        &self,
        vault_key_id: &str,
        user_id_hash: &str,
        chat_id: &str,
        placeholder_id: &str,
        app_id: &str,
        skill_id: &str,
        grouped_rows: Option<Vec<Vec<Value>>>,
        flat_rows: Option<Vec<Value>>,
        preserved_metadata: Value,
    ) -> Result<(Embed, FromPlaceholder), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(groups) = grouped_rows {
            let child_type = composite_child_type(app_id, skill_id);
            let mut child_ids = Vec::new();
            for rows in &groups {
                let mut child_content = serde_json::json!({ "results": rows });
                merge_metadata(&mut child_content, preserved_metadata.clone());
                let mut child = Embed::new(Uuid::new_v4().to_string(), child_type, child_content);
                child.parent_embed_id = Some(placeholder_id.to_string());
                child.status = EmbedStatus::Finished;
                child.chat_id_hash = hash_content_id(chat_id);
                self.write_embed(vault_key_id, &child).await?;
                child_ids.push(child.id);
            }

            let mut parent_content = serde_json::json!({
                "app_id": app_id,
                "skill_id": skill_id,
                "status": "finished",
                "result_count": child_ids.len(),
            });
            merge_metadata(&mut parent_content, preserved_metadata);

            let mut parent = Embed::new(placeholder_id.to_string(), EmbedType::AppSkillUse, parent_content);
            parent.status = EmbedStatus::Finished;
            parent.child_embed_ids = Some(child_ids);
            parent.chat_id_hash = hash_content_id(chat_id);

            // Send before writing to cache: writing first would make the dedup check in
            // send_embed_data see an already-finished cached status and skip the event.
            self.send_embed_data(user_id_hash, &parent).await?;
            self.write_embed(vault_key_id, &parent).await?;
            return Ok((parent, FromPlaceholder::yes()));
        }

        let rows = flat_rows.unwrap_or_default();
        let mut content = serde_json::json!({
            "app_id": app_id,
            "skill_id": skill_id,
            "status": "finished",
            "results": rows,
            "result_count": rows.len(),
        });
        merge_metadata(&mut content, preserved_metadata);

        let mut embed = Embed::new(placeholder_id.to_string(), EmbedType::AppSkillUse, content);
        embed.status = EmbedStatus::Finished;
        embed.chat_id_hash = hash_content_id(chat_id);

        self.send_embed_data(user_id_hash, &embed).await?;
        self.write_embed(vault_key_id, &embed).await?;
        Ok((embed, FromPlaceholder::yes()))
    }

    /// Rewrite an embed as `error`, preserving original metadata so the UI keeps showing the
    /// query/url alongside the failure.
    pub async fn update_embed_status_to_error(
        &self,
        vault_key_id: &str,
        user_id_hash: &str,
        chat_id: &str,
        embed_id: &str,
        error_message: &str,
        preserved_metadata: Value,
    ) -> Result<Embed, Box<dyn std::error::Error + Send + Sync>> {
        let mut content = serde_json::json!({ "status": "error", "error": error_message });
        merge_metadata(&mut content, preserved_metadata);

        let mut embed = Embed::new(embed_id.to_string(), EmbedType::AppSkillUse, content);
        embed.status = EmbedStatus::Error;
        embed.chat_id_hash = hash_content_id(chat_id);

        self.send_embed_data(user_id_hash, &embed).await?;
        self.write_embed(vault_key_id, &embed).await?;
        Ok(embed)
    }

    /// Replace fenced JSON embed references (`{"type": T, "embed_id": X, "url"?: U}`) in a
    /// message body with the decrypted, TOON-encoded embed content. Falls back to `[T EMBED -
    /// URL: U]` when the embed has expired from cache and a `url` fallback was present; leaves
    /// the reference intact otherwise.
    pub async fn resolve_in_content(&self, vault_key_id: &str, body: &str) -> String {
        let mut out = String::with_capacity(body.len());
        let mut rest = body;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let candidate = &rest[start..];
            match find_embed_reference(candidate) {
                Some((reference_json, consumed)) => {
                    out.push_str(&self.render_reference(vault_key_id, &reference_json).await);
                    rest = &candidate[consumed..];
                }
                None => {
                    out.push('{');
                    rest = &candidate[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    async fn render_reference(&self, vault_key_id: &str, reference: &Value) -> String {
        let Some(embed_id) = reference.get("embed_id").and_then(|v| v.as_str()) else {
            return reference.to_string();
        };
        match self.read_embed_content(vault_key_id, embed_id).await {
            Some(content) => {
                format!("```toon\n{}\n```", toon::encode(&toon::flatten_for_toon(&content)))
            }
            None => {
                let embed_type = reference.get("type").and_then(|v| v.as_str()).unwrap_or("EMBED");
                match reference.get("url").and_then(|v| v.as_str()) {
                    Some(url) => format!("[{} EMBED - URL: {}]", embed_type.to_uppercase(), url),
                    None => reference.to_string(),
                }
            }
        }
    }
}

fn merge_metadata(content: &mut Value, metadata: Value) {
    if let (Value::Object(content_map), Value::Object(metadata_map)) = (content, metadata) {
        for (key, value) in metadata_map {
            content_map.entry(key).or_insert(value);
        }
    }
}

fn status_str(status: EmbedStatus) -> &'static str {
    match status {
        EmbedStatus::Processing => "processing",
        EmbedStatus::Finished => "finished",
        EmbedStatus::Error => "error",
        EmbedStatus::Cancelled => "cancelled",
    }
}

fn composite_child_type(app_id: &str, skill_id: &str) -> EmbedType {
    match (app_id, skill_id) {
        ("maps", "places_search") => EmbedType::Place,
        ("web", "search") => EmbedType::Website,
        (_, "events_search") => EmbedType::Event,
        _ => EmbedType::Website,
    }
}

/// Scan for a fenced-or-bare JSON object at the start of `candidate` that matches
/// `{"type": T, "embed_id": X, "url"?: U}`, returning the parsed value and how many bytes to
/// skip past it. Uses serde_json's streaming deserializer's natural "stop at first complete
/// value" behavior via `Deserializer::from_str` + `next().
fn find_embed_reference(candidate: &str) -> Option<(Value, usize)> {
    let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
    let value = stream.next()?.ok()?;
    if value.get("embed_id").is_none() {
        return None;
    }
    let offset = stream.byte_offset();
    Some((value, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_child_type_maps_web_search_to_website() {
        assert_eq!(composite_child_type("web", "search"), EmbedType::Website);
        assert_eq!(composite_child_type("maps", "places_search"), EmbedType::Place);
        assert_eq!(composite_child_type("tickets", "events_search"), EmbedType::Event);
    }

    #[test]
    fn find_embed_reference_recognizes_embed_id_shape() {
        let candidate = r#"{"type": "website", "embed_id": "abc"} trailing text"#;
        let (value, consumed) = find_embed_reference(candidate).unwrap();
        assert_eq!(value["embed_id"], "abc");
        assert_eq!(&candidate[consumed..], " trailing text");
    }

    #[test]
    fn find_embed_reference_rejects_unrelated_json() {
        let candidate = r#"{"foo": "bar"} rest"#;
        assert!(find_embed_reference(candidate).is_none());
    }

    #[test]
    fn find_embed_reference_ignores_references_without_a_url_fallback() {
        let candidate = r#"{"type": "website", "embed_id": "gone"}"#;
        let (value, _) = find_embed_reference(candidate).unwrap();
        assert!(value.get("url").is_none());
    }
}
