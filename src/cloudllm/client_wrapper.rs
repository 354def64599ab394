//! Shared primitives for provider-agnostic LLM clients.
//!
//! The orchestrator talks to whichever upstream model is live through the [`ClientWrapper`]
//! trait and the lightweight data types defined in this module.  The trait abstracts over
//! concrete vendor implementations while the supporting structs describe chat messages,
//! streaming chunks, and token accounting.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use skillstream::cloudllm::client_wrapper::{ClientWrapper, Message, Role};
//! use skillstream::cloudllm::clients::openai::{Model, OpenAIClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPEN_AI_SECRET")?;
//!     let client = OpenAIClient::new_with_model_enum(&key, Model::GPT41Nano);
//!
//!     let response = client.send_message(&[Message::user("Who are you?")], None).await?;
//!
//!     println!("Assistant: {:?}", response.content);
//!     Ok(())
//! }
//! ```
//!
//! # Streaming quick start
//!
//! ```rust,no_run
//! use skillstream::cloudllm::client_wrapper::{ChunkEvent, ClientWrapper, Message};
//! use skillstream::cloudllm::clients::openai::{Model, OpenAIClient};
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPEN_AI_SECRET")?;
//!     let client = OpenAIClient::new_with_model_enum(&key, Model::GPT41Mini);
//!     let request = [Message::user("Explain Rust lifetimes in a sentence.")];
//!
//!     let mut chunks = client.send_message_stream(&request, None).await?;
//!     while let Some(chunk) = chunks.next().await {
//!         if let ChunkEvent::Text(s) = chunk? {
//!             print!("{}", s);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single tool call returned by the LLM in a native function-calling response.
///
/// Providers assign an opaque [`id`](NativeToolCall::id) to each call so that the tool result
/// can be correlated back in a follow-up `Role::Tool` message. `provider_signature` preserves
/// any opaque "thought signature" the provider attaches, which must be echoed back verbatim on
/// the next turn (see the tool-calling loop's per-iteration assistant-message append step).
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call ID, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request, e.g. `"web-search"`.
    pub name: String,
    /// Raw JSON argument string as emitted by the provider (kept raw so the orchestrator can
    /// retain the exact bytes for dedup hashing before parsing).
    pub arguments_raw: String,
    /// Opaque per-call signature some providers attach to reasoning traces; passed through
    /// unmodified, never interpreted.
    pub provider_signature: Option<String>,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat request.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name as it will appear in the API `tools` array, e.g. `"web-search"`.
    pub name: String,
    /// Human-readable description surfaced to the LLM to aid tool selection.
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// Represents the possible roles for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message (model responses).
    Assistant,
    /// A tool-result message correlating with a prior assistant [`NativeToolCall`].
    Tool,
}

/// How many tokens were spent on prompt vs. completion, tagged by provider so the billing
/// driver can match on shape instead of relying on duck-typed attribute access.
#[derive(Clone, Debug)]
pub enum UsageMetadata {
    OpenAiCompatible {
        input_tokens: usize,
        output_tokens: usize,
    },
    Anthropic {
        input_tokens: usize,
        output_tokens: usize,
        cache_read_tokens: usize,
    },
    Google {
        prompt_tokens: usize,
        candidates_tokens: usize,
    },
}

impl UsageMetadata {
    /// Total billable tokens regardless of provider shape.
    pub fn total_tokens(&self) -> usize {
        match self {
            UsageMetadata::OpenAiCompatible {
                input_tokens,
                output_tokens,
            } => input_tokens + output_tokens,
            UsageMetadata::Anthropic {
                input_tokens,
                output_tokens,
                ..
            } => input_tokens + output_tokens,
            UsageMetadata::Google {
                prompt_tokens,
                candidates_tokens,
            } => prompt_tokens + candidates_tokens,
        }
    }

    pub fn input_tokens(&self) -> usize {
        match self {
            UsageMetadata::OpenAiCompatible { input_tokens, .. } => *input_tokens,
            UsageMetadata::Anthropic { input_tokens, .. } => *input_tokens,
            UsageMetadata::Google { prompt_tokens, .. } => *prompt_tokens,
        }
    }

    pub fn output_tokens(&self) -> usize {
        match self {
            UsageMetadata::OpenAiCompatible { output_tokens, .. } => *output_tokens,
            UsageMetadata::Anthropic { output_tokens, .. } => *output_tokens,
            UsageMetadata::Google {
                candidates_tokens, ..
            } => *candidates_tokens,
        }
    }
}

/// Represents a generic message exchanged with an LLM: role, nullable content, an optional
/// native tool-call list, and (for tool-result messages) the call id they answer plus an
/// optional field-elision list used when re-sending history back to the model for inference.
#[derive(Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body. `None` for assistant messages that are pure tool-calls.
    pub content: Option<Arc<str>>,
    /// Native tool calls requested by the assistant. Non-empty only on assistant messages.
    pub tool_calls: Vec<NativeToolCall>,
    /// Present on `Role::Tool` messages: the id of the call this message answers.
    pub tool_call_id: Option<String>,
    /// Present on `Role::Tool` messages: field names to elide when this message is replayed
    /// back into the *current* iteration's inference call (the full content is still kept in
    /// durable history).
    pub ignore_fields_for_inference: Option<Vec<String>>,
}

impl Message {
    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: None,
            ignore_fields_for_inference: None,
        }
    }

    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: None,
            ignore_fields_for_inference: None,
        }
    }

    pub fn assistant_text(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: None,
            ignore_fields_for_inference: None,
        }
    }

    pub fn assistant_tool_calls(
        content: Option<Arc<str>>,
        tool_calls: Vec<NativeToolCall>,
    ) -> Self {
        Message {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
            ignore_fields_for_inference: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<Arc<str>>,
        ignore_fields_for_inference: Option<Vec<String>>,
    ) -> Self {
        Message {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: Some(tool_call_id.into()),
            ignore_fields_for_inference,
        }
    }

    /// Rough token estimate at 4 chars/token, used by the conversation truncation pass.
    /// Not exact; only a stable, monotone estimator is required.
    pub fn estimated_tokens(&self) -> usize {
        let content_len = self.content.as_ref().map(|c| c.len()).unwrap_or(0);
        let tool_call_len: usize = self
            .tool_calls
            .iter()
            .map(|tc| tc.name.len() + tc.arguments_raw.len())
            .sum();
        (content_len + tool_call_len) / 4 + 1
    }
}

/// The sum type the LLM client streams: one variant per kind of event the provider can emit
/// mid-turn. Classification happens at the client boundary so downstream orchestrator code
/// never inspects provider wire format.
#[derive(Debug, Clone)]
pub enum ChunkEvent {
    /// An incremental slice of the visible assistant text.
    Text(String),
    /// An incremental slice of reasoning/"thinking" content, published on a separate channel.
    Thinking(String),
    /// An opaque signature accompanying a thinking block; passed through unexamined.
    ThinkingSignature(String),
    /// A fully parsed tool call. Some providers stream tool-call arguments incrementally; this
    /// variant is only emitted once the arguments are known to be complete.
    ToolCall(NativeToolCall),
    /// Terminal usage accounting for the turn. At most one is emitted per stream.
    Usage(UsageMetadata),
}

/// Type alias for a stream of classified chunk events.
pub type ChunkEventStream =
    Pin<Box<dyn Stream<Item = Result<ChunkEvent, Box<dyn Error + Send + Sync>>> + Send>>;

/// Trait defining the interface to interact with various LLM services.
///
/// All implementations **must** be thread-safe (`Send + Sync`) so they can be shared between
/// async tasks and tried in sequence by the tool-calling loop's model-fallback step.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion. The `tools` parameter carries
    /// native [`ToolDefinition`]s forwarded to the provider's function-calling API.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Request a streaming response. Implementations must emit [`ChunkEvent::ToolCall`] as soon
    /// as a call's arguments are fully buffered and [`ChunkEvent::Usage`] exactly once, as the
    /// last item before the stream ends. A provider that cannot stream natively should fall back
    /// to calling [`ClientWrapper::send_message`] once and replaying the result through
    /// [`adapt_non_streaming`].
    async fn send_message_stream(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChunkEventStream, Box<dyn Error + Send + Sync>>;

    /// Return the identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the most recent call, for providers that only expose it
    /// out-of-band from [`ClientWrapper::send_message`].
    async fn get_last_usage(&self) -> Option<UsageMetadata> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Expose a shared mutable slot where the implementation can persist token usage.
    fn usage_slot(&self) -> Option<&Mutex<Option<UsageMetadata>>> {
        None
    }
}

/// Adapts a one-shot [`ClientWrapper::send_message`] response into a one-shot-then-done
/// [`ChunkEventStream`], for providers whose wrapper does not implement true token streaming.
pub fn adapt_non_streaming(message: Message, usage: Option<UsageMetadata>) -> ChunkEventStream {
    let mut events = Vec::new();
    if let Some(content) = message.content {
        events.push(Ok(ChunkEvent::Text(content.to_string())));
    }
    for tc in message.tool_calls {
        events.push(Ok(ChunkEvent::ToolCall(tc)));
    }
    if let Some(usage) = usage {
        events.push(Ok(ChunkEvent::Usage(usage)));
    }
    Box::pin(stream::iter(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimated_tokens_is_monotone_in_content_length() {
        let short = Message::user("hi");
        let long = Message::user("hello ".repeat(50));
        assert!(long.estimated_tokens() > short.estimated_tokens());
    }

    #[tokio::test]
    async fn adapt_non_streaming_yields_text_then_tool_calls_then_usage() {
        let msg = Message::assistant_tool_calls(
            Some(Arc::from("thinking out loud")),
            vec![NativeToolCall {
                id: "call_1".into(),
                name: "web-search".into(),
                arguments_raw: "{}".into(),
                provider_signature: None,
            }],
        );
        let usage = UsageMetadata::OpenAiCompatible {
            input_tokens: 10,
            output_tokens: 5,
        };
        let mut stream = adapt_non_streaming(msg, Some(usage));
        let (mut saw_text, mut saw_tool, mut saw_usage) = (false, false, false);
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                ChunkEvent::Text(_) => saw_text = true,
                ChunkEvent::ToolCall(_) => saw_tool = true,
                ChunkEvent::Usage(_) => saw_usage = true,
                _ => {}
            }
        }
        assert!(saw_text && saw_tool && saw_usage);
    }
}
