//! Anthropic Claude client wrapper built on the OpenAI-compatible transport.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cloudllm::client_wrapper::{
    ChunkEventStream, ClientWrapper, Message, ToolDefinition, UsageMetadata,
};
use crate::cloudllm::clients::common::{get_shared_http_client, send_with_native_tools, stream_with_native_tools};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

#[derive(Debug, Clone, Copy)]
pub enum Model {
    Claude4Sonnet,
    Claude4Opus,
    Claude35Haiku,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Claude4Sonnet => "claude-4-sonnet",
            Model::Claude4Opus => "claude-4-opus",
            Model::Claude35Haiku => "claude-3-5-haiku",
        }
    }
}

/// A [`ClientWrapper`] implementation backed by Anthropic's OpenAI-compatible endpoint.
pub struct ClaudeClient {
    api_key: String,
    base_url: String,
    model: String,
    usage: Mutex<Option<UsageMetadata>>,
}

impl ClaudeClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.to_string(),
            usage: Mutex::new(None),
        }
    }

    pub fn new_with_model_enum(api_key: &str, model: Model) -> Self {
        Self::new(api_key, model.as_str())
    }
}

#[async_trait]
impl ClientWrapper for ClaudeClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        send_with_native_tools(
            &self.base_url,
            &self.api_key,
            &self.model,
            messages,
            tools.as_deref().unwrap_or(&[]),
            get_shared_http_client(),
            &self.usage,
        )
        .await
    }

    async fn send_message_stream(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChunkEventStream, Box<dyn std::error::Error + Send + Sync>> {
        stream_with_native_tools(
            &self.base_url,
            &self.api_key,
            &self.model,
            messages,
            tools.as_deref().unwrap_or(&[]),
            get_shared_http_client(),
        )
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<UsageMetadata>>> {
        Some(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_enum_maps_to_expected_identifiers() {
        assert_eq!(Model::Claude4Sonnet.as_str(), "claude-4-sonnet");
    }
}
