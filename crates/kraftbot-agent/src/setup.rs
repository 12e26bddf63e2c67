//! Building a ready-to-run agent from [`Settings`].

use std::collections::HashSet;
use std::sync::Arc;

use kraftbot_core::{PromptLoader, Settings};
use kraftbot_mcp::{DefaultHandleFactory, DiscoveryFailure, McpManager, McpServerConfig};
use kraftbot_providers::{OpenRouterProvider, Provider};
use tracing::{info, warn};

use crate::agent::{Agent, AgentError, AgentResult};
use crate::sampling::ProviderSampler;

/// Per-invocation choices layered over the settings.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Model id; the configured default when absent.
    pub model: Option<String>,
    /// System prompt name or path; the configured default prompt file when absent.
    pub prompt: Option<String>,
    /// End-user id; the configured default when absent.
    pub user: Option<String>,
}

/// An agent plus what happened while preparing it.
pub struct AgentSetup {
    pub agent: Agent,
    /// Name or path of the system prompt that was loaded.
    pub loaded_prompt: Option<String>,
    /// Why the requested prompt could not be used; the default prompt is used instead.
    pub prompt_error: Option<kraftbot_core::Error>,
    /// Optional MCP servers whose tools are unavailable for this agent.
    pub skipped_servers: Vec<DiscoveryFailure>,
}

/// Create the provider, register the configured MCP servers and discover
/// their tools.
///
/// Servers that allow sampling have their `sampling/createMessage`
/// requests answered by the same provider and model as the agent.
///
/// Fails when the API key is missing or when a server marked `required`
/// cannot be registered or reached. Other server failures are reported in
/// [`AgentSetup::skipped_servers`].
pub async fn build_agent(settings: &Settings, options: AgentOptions) -> AgentResult<AgentSetup> {
    let provider: Arc<dyn Provider> = Arc::new(OpenRouterProvider::from_settings(settings)?);
    let model = options.model.unwrap_or_else(|| settings.default_model.clone());

    let sampler = ProviderSampler::new(Arc::clone(&provider), &model, settings.max_response_tokens);
    let factory = DefaultHandleFactory::new().with_sampler(Arc::new(sampler));
    let server_settings = settings.mcp_servers();
    let manager = McpManager::from_settings_with_factory(&server_settings, factory)?;
    let required: HashSet<String> = server_settings
        .iter()
        .filter(|s| s.required)
        .filter_map(|s| McpServerConfig::from_settings(s).ok())
        .map(|config| config.name().to_string())
        .collect();

    let mut builder = Agent::builder()
        .provider(provider)
        .toolset(manager.get_servers())
        .model(model)
        .max_tokens(settings.max_response_tokens)
        .user(options.user.unwrap_or_else(|| settings.default_user_id.clone()))
        .turn_timeout(settings.request_timeout());

    let mut loaded_prompt = None;
    let mut prompt_error = None;
    if let Some(prompt) = options.prompt.or_else(|| settings.default_system_prompt_file.clone()) {
        let loader = PromptLoader::new(settings.prompts_dir());
        match loader.load_prompt(&prompt) {
            Ok(text) => {
                info!(prompt = %prompt, "Loaded system prompt");
                builder = builder.system_prompt(text);
                loaded_prompt = Some(prompt);
            }
            Err(e) => {
                warn!(prompt = %prompt, error = %e, "Could not load system prompt, using default");
                prompt_error = Some(e);
            }
        }
    }

    let mut agent = builder.build()?;

    let mut skipped_servers = Vec::new();
    for failure in agent.discover_tools().await {
        if required.contains(&failure.server) {
            agent.close().await;
            return Err(AgentError::RequiredServer {
                server: failure.server,
                source: failure.error,
            });
        }
        skipped_servers.push(failure);
    }

    Ok(AgentSetup {
        agent,
        loaded_prompt,
        prompt_error,
        skipped_servers,
    })
}
