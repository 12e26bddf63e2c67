//! OpenRouter provider (OpenAI-compatible chat completions).

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kraftbot_core::sse::{SseEvent, SseParser};
use kraftbot_core::{Message, ProviderError, Role, Settings, ToolCall, ToolDefinition};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::traits::{
    CompletionRequest, CompletionResponse, CompletionStream, FinishReason, Provider, StreamChunk,
    ToolCallDelta, Usage,
};

const PROVIDER_ID: &str = "openrouter";

/// Default OpenRouter API base URL.
pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

/// Chat-completions client for OpenRouter.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Option<Duration>,
    app_title: String,
    app_url: Option<String>,
}

impl OpenRouterProvider {
    /// Create a provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENROUTER_API_URL.to_string(),
            timeout: None,
            app_title: "KraftBot".to_string(),
            app_url: None,
        }
    }

    /// Create a provider from settings. Fails when no API key is configured.
    pub fn from_settings(settings: &Settings) -> kraftbot_core::Result<Self> {
        let api_key = settings
            .openrouter_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| kraftbot_core::Error::provider_not_configured(PROVIDER_ID))?;

        Ok(Self::new(api_key)
            .with_base_url(&settings.openrouter_base_url)
            .with_timeout(settings.request_timeout()))
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bound each HTTP request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attribution headers OpenRouter shows on its dashboard.
    pub fn with_app_info(mut self, title: impl Into<String>, url: Option<String>) -> Self {
        self.app_title = title.into();
        self.app_url = url;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::text("system", system.clone()));
        }
        messages.extend(request.messages.iter().map(convert_message));

        ChatRequest {
            model: request.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
            tools: (!request.tools.is_empty()).then(|| request.tools.iter().map(convert_tool).collect()),
            user: request.user.clone(),
            stream: false,
            stream_options: None,
        }
    }

    /// POST a chat request and map failure statuses to [`ProviderError`].
    async fn send(&self, api_request: &ChatRequest) -> Result<Response, ProviderError> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("X-Title", &self.app_title)
            .json(api_request);
        if let Some(url) = &self.app_url {
            req = req.header("HTTP-Referer", url);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        error!(status = %status, "OpenRouter API error: {}", error_text);
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthenticationFailed {
                provider: PROVIDER_ID.to_string(),
                message: error_text,
            },
            _ => ProviderError::api_error(PROVIDER_ID, status.as_u16(), error_text),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: PROVIDER_ID.to_string(),
                seconds: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }
        } else {
            ProviderError::NetworkError {
                provider: PROVIDER_ID.to_string(),
                message: e.to_string(),
            }
        }
    }
}

fn convert_message(message: &Message) -> ChatMessage {
    let tool_calls = (!message.tool_calls.is_empty()).then(|| {
        message
            .tool_calls
            .iter()
            .map(|call| ChatToolCall {
                id: call.id.clone(),
                tool_type: "function".to_string(),
                function: ChatFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect()
    });

    ChatMessage {
        role: message.role.as_str().to_string(),
        content: Some(message.content.clone()),
        tool_calls,
        tool_call_id: if message.role == Role::Tool {
            message.tool_call_id.clone()
        } else {
            None
        },
    }
}

fn convert_tool(tool: &ToolDefinition) -> ChatTool {
    ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

/// The error object OpenRouter sends with a 200 when an upstream fails.
fn body_error(error: &Value) -> ProviderError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let status = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(500);
    ProviderError::api_error(PROVIDER_ID, status, message)
}

/// A choice that failed mid-generation.
fn choice_error(finish_reason: Option<&str>, error: &Value) -> ProviderError {
    ProviderError::api_error(
        PROVIDER_ID,
        500,
        format!("finish_reason={} error={}", finish_reason.unwrap_or("error"), error),
    )
}

fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> FinishReason {
    match reason {
        Some("length") => FinishReason::MaxTokens,
        Some("tool_calls") => FinishReason::ToolUse,
        Some("content_filter") => FinishReason::ContentFilter,
        Some("error") => FinishReason::Error,
        _ if has_tool_calls => FinishReason::ToolUse,
        _ => FinishReason::Stop,
    }
}

/// Turn a response body into a completion, or the error it reports.
fn parse_response(body: Value) -> Result<CompletionResponse, ProviderError> {
    if let Some(error) = body.get("error") {
        return Err(body_error(error));
    }

    let response: ChatResponse = serde_json::from_value(body).map_err(|e| ProviderError::InvalidResponse {
        provider: PROVIDER_ID.to_string(),
        message: e.to_string(),
    })?;

    let choice = response.choices.into_iter().next().ok_or_else(|| ProviderError::InvalidResponse {
        provider: PROVIDER_ID.to_string(),
        message: "response contained no choices".to_string(),
    })?;

    if let Some(error) = &choice.error {
        return Err(choice_error(choice.finish_reason.as_deref(), error));
    }

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = if call.function.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.function.arguments).unwrap_or(Value::String(call.function.arguments))
            };
            ToolCall::new(call.id, call.function.name, arguments)
        })
        .collect::<Vec<_>>();

    let finish_reason = map_finish_reason(choice.finish_reason.as_deref(), !tool_calls.is_empty());
    let usage = response.usage.map(Usage::from).unwrap_or_default();

    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason,
        usage,
    })
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "OpenRouter"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let api_request = self.build_request(&request);
        debug!(messages = api_request.messages.len(), "Sending request to OpenRouter");

        let response = self.send(&api_request).await?;
        let body: Value = response.json().await.map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER_ID.to_string(),
            message: e.to_string(),
        })?;
        Ok(parse_response(body)?)
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete_stream(&self, request: CompletionRequest) -> anyhow::Result<CompletionStream> {
        let mut api_request = self.build_request(&request);
        api_request.stream = true;
        api_request.stream_options = Some(StreamOptions { include_usage: true });
        debug!(messages = api_request.messages.len(), "Sending streaming request to OpenRouter");

        let response = self.send(&api_request).await?;
        Ok(chunk_stream(response))
    }
}

type PendingChunks = VecDeque<anyhow::Result<StreamChunk>>;

/// Decode an event-stream body into completion chunks.
///
/// The stream ends at `[DONE]`, at the end of the body, or right after the
/// first error.
fn chunk_stream(response: Response) -> CompletionStream {
    let state = (response.bytes_stream(), SseParser::new(), PendingChunks::new(), false);

    Box::pin(stream::unfold(state, |(mut bytes, mut parser, mut pending, mut done)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (bytes, parser, pending, done)));
            }
            if done {
                return None;
            }

            match bytes.next().await {
                Some(Ok(data)) => {
                    for event in parser.feed(&data) {
                        if queue_event(&event, &mut pending) {
                            done = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    done = true;
                    let err = ProviderError::NetworkError {
                        provider: PROVIDER_ID.to_string(),
                        message: e.to_string(),
                    };
                    pending.push_back(Err(err.into()));
                }
                None => {
                    done = true;
                    if let Some(event) = parser.finish() {
                        queue_event(&event, &mut pending);
                    }
                }
            }
        }
    }))
}

/// Queue the chunks of one event. Returns whether the stream is over.
fn queue_event(event: &SseEvent, pending: &mut PendingChunks) -> bool {
    if event.is_done() {
        return true;
    }
    match parse_stream_event(&event.data) {
        Ok(chunks) => {
            pending.extend(chunks.into_iter().map(Ok));
            false
        }
        Err(e) => {
            pending.push_back(Err(e.into()));
            true
        }
    }
}

/// Turn one `data:` payload into chunks, or the error it reports.
fn parse_stream_event(data: &str) -> Result<Vec<StreamChunk>, ProviderError> {
    let body: Value = match serde_json::from_str(data) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Skipping unparsable stream event");
            return Ok(Vec::new());
        }
    };
    if let Some(error) = body.get("error") {
        return Err(body_error(error));
    }

    let event: ChatStreamEvent = serde_json::from_value(body).map_err(|e| ProviderError::InvalidResponse {
        provider: PROVIDER_ID.to_string(),
        message: e.to_string(),
    })?;

    let mut chunks = Vec::new();
    if let Some(choice) = event.choices.into_iter().next() {
        if let Some(error) = &choice.error {
            return Err(choice_error(choice.finish_reason.as_deref(), error));
        }

        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                chunks.push(StreamChunk {
                    delta: Some(content),
                    ..StreamChunk::default()
                });
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match call.function {
                    Some(function) => (function.name, function.arguments),
                    None => (None, None),
                };
                chunks.push(StreamChunk {
                    tool_call_delta: Some(ToolCallDelta {
                        index: call.index,
                        id: call.id,
                        name,
                        arguments,
                    }),
                    ..StreamChunk::default()
                });
            }
        }

        if choice.finish_reason.is_some() {
            chunks.push(StreamChunk {
                finish_reason: Some(map_finish_reason(choice.finish_reason.as_deref(), false)),
                ..StreamChunk::default()
            });
        }
    }

    if let Some(usage) = event.usage {
        chunks.push(StreamChunk {
            usage: Some(usage.into()),
            ..StreamChunk::default()
        });
    }
    Ok(chunks)
}

// OpenAI-compatible wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    tool_type: String,
    function: ChatFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<ChatUsage> for Usage {
    fn from(usage: ChatUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatStreamEvent {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: Option<ChatDelta>,
    finish_reason: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<ChatFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
