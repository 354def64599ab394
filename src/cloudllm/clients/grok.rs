//! xAI Grok client wrapper routed through the OpenAI-compatible surface.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cloudllm::client_wrapper::{
    ChunkEventStream, ClientWrapper, Message, ToolDefinition, UsageMetadata,
};
use crate::cloudllm::clients::common::{get_shared_http_client, send_with_native_tools, stream_with_native_tools};

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";

#[derive(Debug, Clone, Copy)]
pub enum Model {
    Grok4,
    Grok4Fast,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Grok4 => "grok-4",
            Model::Grok4Fast => "grok-4-fast",
        }
    }
}

/// A [`ClientWrapper`] implementation backed by xAI's OpenAI-compatible endpoint.
pub struct GrokClient {
    api_key: String,
    base_url: String,
    model: String,
    usage: Mutex<Option<UsageMetadata>>,
}

impl GrokClient {
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
impl ClientWrapper for GrokClient {
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
        assert_eq!(Model::Grok4.as_str(), "grok-4");
    }
}
