//! Serving MCP sampling requests with the agent's model.

use std::sync::Arc;

use async_trait::async_trait;
use kraftbot_core::Message;
use kraftbot_mcp::{CreateMessageParams, CreateMessageResult, McpError, SamplingContent, SamplingHandler};
use kraftbot_providers::{CompletionRequest, FinishReason, Provider};
use tracing::debug;

/// Completes `sampling/createMessage` requests through a [`Provider`].
///
/// The server's model preferences are ignored; the configured model answers.
pub struct ProviderSampler {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
}

impl ProviderSampler {
    /// `max_tokens` caps whatever the server asks for.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
        }
    }

    fn request(&self, params: CreateMessageParams) -> Result<CompletionRequest, McpError> {
        let messages = params
            .messages
            .into_iter()
            .map(|message| {
                let SamplingContent::Text { text } = message.content else {
                    return Err(McpError::Sampling("only text content can be sampled".into()));
                };
                match message.role.as_str() {
                    "assistant" => Ok(Message::assistant(text)),
                    _ => Ok(Message::user(text)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if messages.is_empty() {
            return Err(McpError::Sampling("no messages to complete".into()));
        }

        let mut request = CompletionRequest::new(&self.model, messages);
        request.system = params.system_prompt;
        request.max_tokens = params.max_tokens.min(self.max_tokens).max(1);
        request.temperature = params.temperature;
        Ok(request)
    }
}

#[async_trait]
impl SamplingHandler for ProviderSampler {
    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, McpError> {
        let request = self.request(params)?;
        debug!(model = %self.model, messages = request.messages.len(), "Sampling for MCP server");

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| McpError::Sampling(e.to_string()))?;

        let stop_reason = match response.finish_reason {
            FinishReason::Stop => Some("endTurn"),
            FinishReason::MaxTokens => Some("maxTokens"),
            _ => None,
        };

        Ok(CreateMessageResult {
            role: "assistant".to_string(),
            content: SamplingContent::text(response.content),
            model: self.model.clone(),
            stop_reason: stop_reason.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kraftbot_core::Role;
    use kraftbot_mcp::SamplingMessage;
    use kraftbot_providers::{CompletionResponse, Usage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn id(&self) -> &str {
            "recording"
        }

        fn name(&self) -> &str {
            "Recording"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(CompletionResponse {
                content: "Bench him.".into(),
                tool_calls: vec![],
                finish_reason: FinishReason::MaxTokens,
                usage: Usage::default(),
            })
        }
    }

    fn params(messages: Vec<SamplingMessage>, max_tokens: u32) -> CreateMessageParams {
        CreateMessageParams {
            messages,
            system_prompt: Some("You rank players.".into()),
            max_tokens,
            temperature: Some(0.2),
            stop_sequences: vec![],
            model_preferences: None,
        }
    }

    fn text(role: &str, text: &str) -> SamplingMessage {
        SamplingMessage {
            role: role.into(),
            content: SamplingContent::text(text),
        }
    }

    #[tokio::test]
    async fn test_sampling_uses_configured_model() {
        let provider = Arc::new(RecordingProvider::default());
        let sampler = ProviderSampler::new(provider.clone(), "test/model", 500);

        let result = sampler
            .create_message(params(
                vec![text("user", "Start or sit?"), text("assistant", "Who?"), text("user", "My RB2")],
                4000,
            ))
            .await
            .unwrap();

        assert_eq!(result.role, "assistant");
        assert_eq!(result.content, SamplingContent::text("Bench him."));
        assert_eq!(result.model, "test/model");
        assert_eq!(result.stop_reason.as_deref(), Some("maxTokens"));

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].model, "test/model");
        assert_eq!(requests[0].max_tokens, 500);
        assert_eq!(requests[0].system.as_deref(), Some("You rank players."));
        assert_eq!(requests[0].temperature, Some(0.2));
        let roles: Vec<_> = requests[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[tokio::test]
    async fn test_sampling_rejects_images_and_empty_requests() {
        let provider = Arc::new(RecordingProvider::default());
        let sampler = ProviderSampler::new(provider.clone(), "test/model", 500);

        let image = SamplingMessage {
            role: "user".into(),
            content: SamplingContent::Image {
                data: "AAAA".into(),
                mime_type: "image/png".into(),
            },
        };
        let err = sampler.create_message(params(vec![image], 10)).await.unwrap_err();
        assert!(matches!(err, McpError::Sampling(_)));

        let err = sampler.create_message(params(vec![], 10)).await.unwrap_err();
        assert!(matches!(err, McpError::Sampling(_)));
        assert!(provider.requests.lock().unwrap().is_empty());
    }
}
