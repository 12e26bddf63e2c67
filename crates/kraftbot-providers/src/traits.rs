//! Provider trait definitions.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use kraftbot_core::{Message, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Request for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use, e.g. `anthropic/claude-3.5-sonnet`
    pub model: String,
    /// Conversation so far
    pub messages: Vec<Message>,
    /// System prompt
    pub system: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Tools the model may call
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// End-user identifier forwarded to the provider
    #[serde(default)]
    pub user: Option<String>,
}

impl CompletionRequest {
    /// A request for `model` over `messages` with defaults for everything else.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens: 2000,
            temperature: None,
            tools: Vec::new(),
            user: None,
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Text content
    pub content: String,
    /// Tool calls requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// Reason the completion finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal completion
    Stop,
    /// Hit max tokens limit
    MaxTokens,
    /// Tool use requested
    ToolUse,
    /// Content was filtered
    ContentFilter,
    /// The provider reported an error mid-generation
    Error,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Streaming chunk from a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Content delta
    pub delta: Option<String>,
    /// Tool call delta
    pub tool_call_delta: Option<ToolCallDelta>,
    /// Set on the chunk that carries the finish reason
    pub finish_reason: Option<FinishReason>,
    /// Usage, usually only on the last chunk
    pub usage: Option<Usage>,
}

/// Fragment of a tool call being streamed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call in the assistant message
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Arguments fragment (partial JSON)
    pub arguments: Option<String>,
}

/// Chunks of one streamed completion.
pub type CompletionStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// Replay a finished completion as a stream.
pub fn completion_as_stream(response: CompletionResponse) -> CompletionStream {
    let mut chunks = Vec::new();
    if !response.content.is_empty() {
        chunks.push(Ok(StreamChunk {
            delta: Some(response.content),
            ..StreamChunk::default()
        }));
    }
    for (index, call) in response.tool_calls.into_iter().enumerate() {
        chunks.push(Ok(StreamChunk {
            tool_call_delta: Some(ToolCallDelta {
                index,
                id: Some(call.id),
                name: Some(call.name),
                arguments: Some(call.arguments.to_string()),
            }),
            ..StreamChunk::default()
        }));
    }
    chunks.push(Ok(StreamChunk {
        finish_reason: Some(response.finish_reason),
        usage: Some(response.usage),
        ..StreamChunk::default()
    }));
    Box::pin(stream::iter(chunks))
}

/// An LLM backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Whether the provider has what it needs to make requests.
    fn is_configured(&self) -> bool;

    /// Generate a completion (non-streaming).
    ///
    /// Failures carry a [`kraftbot_core::ProviderError`] that callers can
    /// downcast to for classification.
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse>;

    /// Generate a completion (streaming).
    ///
    /// Providers without native streaming deliver the whole completion
    /// as a short stream.
    async fn complete_stream(&self, request: CompletionRequest) -> anyhow::Result<CompletionStream> {
        Ok(completion_as_stream(self.complete(request).await?))
    }
}
