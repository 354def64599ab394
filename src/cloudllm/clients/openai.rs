//! OpenAI Chat Completions client that captures token usage statistics.
//!
//! # Key Features
//!
//! - **`send_message`**: returns a [`Message`] ready to feed back into the tool-calling loop.
//! - **Automatic usage capture**: the last token accounting is stored in a shared slot.
//! - **Streaming support**: `send_message_stream` yields [`ChunkEvent`]s including native tool
//!   calls, matching the model-fallback step's streaming contract.
//!
//! # Example
//!
//! ```rust,no_run
//! use skillstream::cloudllm::client_wrapper::{ClientWrapper, Message};
//! use skillstream::cloudllm::clients::openai::{Model, OpenAIClient};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OpenAIClient::new_with_model_enum(&std::env::var("OPEN_AI_SECRET")?, Model::GPT41Nano);
//! let response = client.send_message(&[Message::user("Who are you?")], None).await?;
//! println!("{:?}", response.content);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cloudllm::client_wrapper::{
    ChunkEventStream, ClientWrapper, Message, ToolDefinition, UsageMetadata,
};
use crate::cloudllm::clients::common::{get_shared_http_client, send_with_native_tools, stream_with_native_tools};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Well-known OpenAI chat models. Callers needing an unlisted model should use
/// [`OpenAIClient::new`] directly with the raw model string.
#[derive(Debug, Clone, Copy)]
pub enum Model {
    GPT41,
    GPT41Mini,
    GPT41Nano,
    GPT4o,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::GPT41 => "gpt-4.1",
            Model::GPT41Mini => "gpt-4.1-mini",
            Model::GPT41Nano => "gpt-4.1-nano",
            Model::GPT4o => "gpt-4o",
        }
    }
}

/// A [`ClientWrapper`] implementation backed directly by OpenAI's Chat Completions API.
pub struct OpenAIClient {
    api_key: String,
    base_url: String,
    model: String,
    usage: Mutex<Option<UsageMetadata>>,
}

impl OpenAIClient {
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

    pub fn new_with_base_url(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            model: model.to_string(),
            usage: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
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
        assert_eq!(Model::GPT41Nano.as_str(), "gpt-4.1-nano");
        assert_eq!(Model::GPT4o.as_str(), "gpt-4o");
    }

    #[test]
    fn new_with_base_url_overrides_default_endpoint() {
        let client = OpenAIClient::new_with_base_url("key", "https://proxy.internal/v1", "gpt-4.1");
        assert_eq!(client.model_name(), "gpt-4.1");
        assert_eq!(client.base_url, "https://proxy.internal/v1");
    }
}
