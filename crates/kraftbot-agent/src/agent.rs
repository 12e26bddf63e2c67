//! Core agent implementation.
//!
//! The [`Agent`] connects a [`Provider`] to the tools of the MCP servers it
//! was built with. One [`run`](Agent::run) is one user turn:
//!
//! ```text
//! prompt ─▶ Provider ─▶ tool calls? ─yes─▶ Toolset ─▶ Provider ─▶ ...
//!                            │
//!                            no
//!                            ▼
//!                      AgentResponse
//! ```
//!
//! [`run_stream`](Agent::run_stream) runs the same loop but hands text to
//! [`AgentEventHandler::on_text_delta`] as it arrives.
//!
//! The conversation is not carried between runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kraftbot_core::{Message, ProviderError, ToolCall, ToolDefinition, ToolResult};
use kraftbot_mcp::{DiscoveryFailure, McpError, ToolSource, Toolset};
use kraftbot_providers::{CompletionRequest, CompletionResponse, FinishReason, Provider, ToolCallDelta, Usage};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// System prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are KraftBot, an elite fantasy football strategist.

Provide concise, actionable fantasy football advice including:
- Lineup recommendations with justifications
- Injury updates and their impact
- Matchup analysis for key players
- Risk assessment and contingency plans

Format responses clearly with bullet points.";

const SERVICE_ERROR_MESSAGE: &str = "API Error: The model service returned an error response. \
This could be due to API limits, model availability, or service issues. \
Please try again or use a different model.";

const API_KEY_ERROR_MESSAGE: &str =
    "API Key Error: Please check your OpenRouter API key is valid and has sufficient credits.";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during a run.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Error from the AI provider.
    #[error("Provider error: {0}")]
    Provider(#[from] anyhow::Error),

    /// The model kept requesting tools past the step limit.
    #[error("Maximum steps exceeded: {0}")]
    MaxStepsExceeded(usize),

    /// The whole turn took longer than the configured bound.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Agent not properly configured.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Settings or prompt problem.
    #[error(transparent)]
    Config(kraftbot_core::Error),

    /// An MCP server entry could not be registered.
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// A server marked `required` could not be reached.
    #[error("Required MCP server '{server}' is unavailable: {source}")]
    RequiredServer { server: String, source: McpError },
}

impl From<kraftbot_core::Error> for AgentError {
    fn from(error: kraftbot_core::Error) -> Self {
        match error {
            kraftbot_core::Error::Provider(e) => AgentError::Provider(e.into()),
            other => AgentError::Config(other),
        }
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Turn a failure into the text shown to the user in place of an answer.
///
/// Provider failures are recognised by their [`ProviderError`] first and by
/// their message second.
pub fn classify_error(error: &AgentError) -> String {
    if let AgentError::Provider(err) = error {
        if let Some(provider_err) = err.downcast_ref::<ProviderError>() {
            match provider_err {
                ProviderError::ApiError { message, .. } if message.contains("finish_reason") => {
                    return SERVICE_ERROR_MESSAGE.to_string();
                }
                ProviderError::InvalidResponse { .. } => {
                    return format!("API Response Error: {}", provider_err);
                }
                ProviderError::AuthenticationFailed { .. } | ProviderError::NotConfigured { .. } => {
                    return API_KEY_ERROR_MESSAGE.to_string();
                }
                _ => {}
            }
        }
    }

    let message = error.to_string();
    let lower = message.to_lowercase();
    if message.contains("finish_reason") && message.contains("error") {
        SERVICE_ERROR_MESSAGE.to_string()
    } else if lower.contains("validation error") {
        format!("API Response Error: {}", message)
    } else if lower.contains("api key") {
        API_KEY_ERROR_MESSAGE.to_string()
    } else {
        message
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier to use.
    pub model: String,
    /// System prompt.
    pub system_prompt: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Temperature for generation.
    pub temperature: Option<f32>,
    /// Maximum number of provider calls in one run.
    pub max_steps: usize,
    /// End-user identifier forwarded to the provider.
    pub user: Option<String>,
    /// Bound on a whole run.
    pub turn_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-3.5-sonnet".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 2000,
            temperature: None,
            max_steps: 8,
            user: None,
            turn_timeout: None,
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Token usage accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TurnUsage {
    fn add(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Final response from the agent.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Text shown to the user. Failures are rendered here as `Error: ...`.
    pub response: String,
    /// Provider calls made.
    pub steps: usize,
    /// Number of tool calls executed.
    pub tool_calls: usize,
    pub usage: TurnUsage,
}

impl AgentResponse {
    fn failed(error: &AgentError) -> Self {
        Self {
            response: format!("Error: {}", classify_error(error)),
            steps: 0,
            tool_calls: 0,
            usage: TurnUsage::default(),
        }
    }

    /// Whether the run ended in an error.
    pub fn is_error(&self) -> bool {
        self.response.starts_with("Error: ")
    }
}

// ============================================================================
// Event Handler
// ============================================================================

/// Callbacks for front ends that want to show progress.
pub trait AgentEventHandler: Send + Sync {
    /// Called before each provider request.
    fn on_thinking(&self) {}

    /// Called when a tool execution starts.
    fn on_tool_start(&self, _call: &ToolCall) {}

    /// Called when a tool execution completes.
    fn on_tool_complete(&self, _call: &ToolCall, _result: &ToolResult) {}

    /// Called with each piece of streamed answer text.
    fn on_text_delta(&self, _delta: &str) {}
}

/// Default event handler that does nothing.
pub struct NoOpEventHandler;

impl AgentEventHandler for NoOpEventHandler {}

// ============================================================================
// Agent
// ============================================================================

/// A model, a system prompt and a fixed set of MCP tools.
///
/// The tools are a snapshot of the registry taken at build time; servers
/// registered afterwards are not seen by this agent.
pub struct Agent {
    provider: Arc<dyn Provider>,
    toolset: Toolset,
    tools_discovered: bool,
    config: AgentConfig,
    event_handler: Arc<dyn AgentEventHandler>,
}

impl Agent {
    /// Start building an agent.
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Replace the progress callbacks.
    pub fn set_event_handler(&mut self, handler: Arc<dyn AgentEventHandler>) {
        self.event_handler = handler;
    }

    /// Tool sources captured at build time.
    pub fn sources(&self) -> &[Arc<dyn ToolSource>] {
        self.toolset.sources()
    }

    /// Tools offered to the model. Empty until discovery has run.
    pub fn tools(&self) -> &[ToolDefinition] {
        self.toolset.definitions()
    }

    /// List the tools of every captured server.
    ///
    /// Servers that fail are left out and returned to the caller, which
    /// decides whether that is fatal.
    pub async fn discover_tools(&mut self) -> Vec<DiscoveryFailure> {
        let failures = self.toolset.discover().await;
        self.tools_discovered = true;
        info!(
            tools = self.toolset.len(),
            failed = failures.len(),
            "Agent tools ready"
        );
        failures
    }

    /// Close every captured server connection.
    pub async fn close(&self) {
        for source in self.toolset.sources() {
            if let Err(e) = source.close().await {
                warn!(server = %source.name(), error = %e, "Failed to close MCP server");
            }
        }
    }

    /// Answer one prompt.
    ///
    /// Never fails: errors are classified and returned as the response text.
    pub async fn run(&mut self, prompt: &str) -> AgentResponse {
        match self.try_run(prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Agent run failed");
                AgentResponse::failed(&e)
            }
        }
    }

    /// Answer one prompt, surfacing failures as [`AgentError`].
    pub async fn try_run(&mut self, prompt: &str) -> AgentResult<AgentResponse> {
        let mut progress = false;
        self.turn(prompt, Delivery::Whole, &mut progress).await
    }

    /// Answer one prompt, streaming text through the event handler.
    ///
    /// If the streamed attempt fails before any text was shown or any tool
    /// was run, the prompt is answered once more with [`run`](Self::run).
    /// A timed out turn is not retried.
    pub async fn run_stream(&mut self, prompt: &str) -> AgentResponse {
        let mut progress = false;
        match self.turn(prompt, Delivery::Streamed, &mut progress).await {
            Ok(response) => response,
            Err(e) if !progress && !matches!(e, AgentError::Timeout(_)) => {
                warn!(error = %e, "Streaming run failed, retrying without streaming");
                self.run(prompt).await
            }
            Err(e) => {
                warn!(error = %e, "Agent run failed");
                AgentResponse::failed(&e)
            }
        }
    }

    /// Like [`run_stream`](Self::run_stream) without the fallback.
    pub async fn try_run_stream(&mut self, prompt: &str) -> AgentResult<AgentResponse> {
        let mut progress = false;
        self.turn(prompt, Delivery::Streamed, &mut progress).await
    }

    async fn turn(&mut self, prompt: &str, delivery: Delivery, progress: &mut bool) -> AgentResult<AgentResponse> {
        if !self.tools_discovered {
            self.discover_tools().await;
        }

        match self.config.turn_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_loop(prompt, delivery, progress))
                .await
                .map_err(|_| AgentError::Timeout(limit))?,
            None => self.run_loop(prompt, delivery, progress).await,
        }
    }

    /// `progress` is set once text reaches the handler or a tool runs.
    async fn run_loop(&self, prompt: &str, delivery: Delivery, progress: &mut bool) -> AgentResult<AgentResponse> {
        let mut messages = vec![Message::user(prompt)];
        let mut usage = TurnUsage::default();
        let mut tool_calls = 0;

        for step in 0..self.config.max_steps {
            debug!(step, "Running agent step");
            self.event_handler.on_thinking();

            let request = self.request(messages.clone());
            let response = match delivery {
                Delivery::Whole => self.provider.complete(request).await?,
                Delivery::Streamed => self.complete_streamed(request, progress).await?,
            };
            usage.add(&response.usage);

            if response.tool_calls.is_empty() {
                return Ok(AgentResponse {
                    response: response.content,
                    steps: step + 1,
                    tool_calls,
                    usage,
                });
            }

            messages.push(Message::assistant_tool_calls(
                response.content,
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                *progress = true;
                let result = self.execute_tool(call).await;
                messages.push(Message::tool_result(&call.id, result.content_for_model()));
                tool_calls += 1;
            }
        }

        warn!(max_steps = self.config.max_steps, "Max steps exceeded");
        Err(AgentError::MaxStepsExceeded(self.config.max_steps))
    }

    /// Drain a completion stream into one response.
    async fn complete_streamed(&self, request: CompletionRequest, progress: &mut bool) -> AgentResult<CompletionResponse> {
        let mut chunks = self.provider.complete_stream(request).await?;
        let mut content = String::new();
        let mut tool_calls = ToolCallBuilder::default();
        let mut finish_reason = FinishReason::Stop;
        let mut usage = Usage::default();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if let Some(delta) = &chunk.delta {
                content.push_str(delta);
                *progress = true;
                self.event_handler.on_text_delta(delta);
            }
            if let Some(delta) = &chunk.tool_call_delta {
                tool_calls.apply_delta(delta);
            }
            if let Some(reason) = chunk.finish_reason {
                finish_reason = reason;
            }
            if let Some(u) = chunk.usage {
                usage = u;
            }
        }

        let tool_calls = tool_calls.build();
        if !tool_calls.is_empty() {
            finish_reason = FinishReason::ToolUse;
        }
        Ok(CompletionResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }

    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        let mut request = CompletionRequest::new(&self.config.model, messages);
        request.system = Some(self.config.system_prompt.clone());
        request.max_tokens = self.config.max_tokens;
        request.temperature = self.config.temperature;
        request.tools = self.toolset.definitions().to_vec();
        request.user = self.config.user.clone();
        request
    }

    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        self.event_handler.on_tool_start(call);
        let result = self.toolset.call(call).await;
        debug!(
            tool = %call.name,
            success = result.success,
            duration_ms = result.duration_ms,
            "Tool call finished"
        );
        self.event_handler.on_tool_complete(call, &result);
        result
    }
}

#[derive(Debug, Clone, Copy)]
enum Delivery {
    Whole,
    Streamed,
}

/// Assembles streamed tool-call fragments, keyed by their index.
#[derive(Debug, Default)]
struct ToolCallBuilder {
    calls: BTreeMap<usize, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallBuilder {
    fn apply_delta(&mut self, delta: &ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            call.id = Some(id.clone());
        }
        if let Some(name) = &delta.name {
            call.name = Some(name.clone());
        }
        if let Some(args) = &delta.arguments {
            call.arguments.push_str(args);
        }
    }

    /// Finished calls in index order. Fragments without an id or name are dropped.
    fn build(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .filter_map(|partial| {
                let id = partial.id?;
                let name = partial.name?;
                let arguments = if partial.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&partial.arguments).unwrap_or(Value::String(partial.arguments))
                };
                Some(ToolCall::new(id, name, arguments))
            })
            .collect()
    }
}

// ============================================================================
// Agent Builder
// ============================================================================

/// Builder for constructing an [`Agent`].
pub struct AgentBuilder {
    provider: Option<Arc<dyn Provider>>,
    sources: Vec<Arc<dyn ToolSource>>,
    config: AgentConfig,
    event_handler: Option<Arc<dyn AgentEventHandler>>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            provider: None,
            sources: Vec::new(),
            config: AgentConfig::default(),
            event_handler: None,
        }
    }

    /// Set the AI provider.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Capture the tool sources, typically `manager.get_servers()`.
    pub fn toolset(mut self, sources: Vec<Arc<dyn ToolSource>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Replace the default system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.config.max_tokens = max;
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = Some(temp);
        self
    }

    pub fn max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self
    }

    pub fn turn_timeout(mut self, timeout: Duration) -> Self {
        self.config.turn_timeout = Some(timeout);
        self
    }

    /// Set the full configuration.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn AgentEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the agent.
    ///
    /// Returns an error if the provider is missing or the step limit is zero.
    pub fn build(self) -> AgentResult<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::NotConfigured("provider is required".into()))?;
        if self.config.max_steps == 0 {
            return Err(AgentError::NotConfigured("max_steps must be at least 1".into()));
        }

        Ok(Agent {
            provider,
            toolset: Toolset::new(self.sources),
            tools_discovered: false,
            config: self.config,
            event_handler: self
                .event_handler
                .unwrap_or_else(|| Arc::new(NoOpEventHandler)),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
