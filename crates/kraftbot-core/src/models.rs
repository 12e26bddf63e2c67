//! Model catalog.

use serde::{Deserialize, Serialize};

/// Description of a model reachable through OpenRouter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name (e.g., "anthropic/claude-3.5-sonnet")
    pub name: String,
    /// Model provider
    pub provider: String,
    /// Model description
    #[serde(default)]
    pub description: Option<String>,
    /// Model strengths
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Speed rating
    #[serde(default = "default_rating")]
    pub speed: String,
    /// Cost rating
    #[serde(default = "default_rating")]
    pub cost: String,
    /// Maximum context length
    #[serde(default)]
    pub context_length: Option<u32>,
}

fn default_rating() -> String {
    "medium".to_string()
}

impl ModelConfig {
    fn entry(
        name: &str,
        provider: &str,
        description: &str,
        strengths: &[&str],
        speed: &str,
        cost: &str,
        context_length: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            description: Some(description.to_string()),
            strengths: strengths.iter().map(|s| s.to_string()).collect(),
            speed: speed.to_string(),
            cost: cost.to_string(),
            context_length: Some(context_length),
        }
    }

    /// The built-in catalog, in display order.
    pub fn defaults() -> Vec<ModelConfig> {
        vec![
            Self::entry(
                "anthropic/claude-3.5-sonnet",
                "Anthropic",
                "Advanced reasoning and code generation",
                &["Code", "Analysis", "Writing", "Reasoning"],
                "fast",
                "medium",
                200_000,
            ),
            Self::entry(
                "openai/gpt-4",
                "OpenAI",
                "General purpose large language model",
                &["General Purpose", "Creative Writing", "Problem Solving"],
                "medium",
                "high",
                128_000,
            ),
            Self::entry(
                "openai/gpt-4-turbo",
                "OpenAI",
                "Faster version of GPT-4 with improved efficiency",
                &["Speed", "Efficiency", "General Purpose"],
                "fast",
                "medium",
                128_000,
            ),
            Self::entry(
                "meta-llama/llama-3.1-70b-instruct",
                "Meta",
                "Open source large language model",
                &["Open Source", "Reasoning", "Code"],
                "medium",
                "low",
                32_000,
            ),
            Self::entry(
                "google/gemini-pro",
                "Google",
                "Multimodal AI with large context window",
                &["Multimodal", "Large Context", "Analysis"],
                "fast",
                "low",
                1_048_576,
            ),
        ]
    }
}
