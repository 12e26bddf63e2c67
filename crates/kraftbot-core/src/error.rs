//! Error types for KraftBot.
//!
//! Structured errors with an optional recovery suggestion that the CLI
//! prints underneath the message.

use thiserror::Error;

/// Result type alias using the KraftBot error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for KraftBot.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// Tool execution error
    #[error("Tool error: {0}")]
    Tool(String),

    /// MCP error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Prompt file could not be loaded
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check ~/.config/kraftbot/config.toml, ./kraftbot.toml and your .env file"),
            Error::Provider(e) => e.recovery_suggestion(),
            Error::Prompt(_) => Some("Run 'kraftbot prompts' to see available prompts"),
            Error::Mcp(_) => Some("Run 'kraftbot mcp' to inspect the configured MCP servers"),
            _ => None,
        }
    }

    /// Create a provider-not-configured error.
    pub fn provider_not_configured(provider: &str) -> Self {
        Error::Provider(ProviderError::NotConfigured {
            provider: provider.to_string(),
            env_var: match provider {
                "openrouter" => Some("OPENROUTER_API_KEY".to_string()),
                _ => None,
            },
        })
    }
}

/// Provider-specific errors with detailed context.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider not configured
    #[error("Provider '{provider}' is not configured")]
    NotConfigured {
        provider: String,
        env_var: Option<String>,
    },

    /// Authentication failed
    #[error("Authentication failed for {provider}: {message}")]
    AuthenticationFailed { provider: String, message: String },

    /// API request failed
    #[error("API request to {provider} failed: {status} - {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    /// Model not found
    #[error("Model '{model}' not found for provider '{provider}'")]
    ModelNotFound { provider: String, model: String },

    /// Timeout
    #[error("Request to {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    /// Network error
    #[error("Network error connecting to {provider}: {message}")]
    NetworkError { provider: String, message: String },

    /// The provider answered, but not with a usable completion
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl ProviderError {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::NotConfigured {
                env_var: Some(_), ..
            } => Some("Set the API key environment variable (get a key at https://openrouter.ai/)"),
            ProviderError::NotConfigured { .. } => Some("Configure the provider in your settings file"),
            ProviderError::AuthenticationFailed { .. } => {
                Some("Check that your OpenRouter API key is valid and has sufficient credits")
            }
            ProviderError::ApiError { status: 429, .. } => {
                Some("You've hit rate limits. Wait a moment and try again")
            }
            ProviderError::ApiError {
                status: 500..=599, ..
            } => Some("The model service is having issues. Try again or use a different model"),
            ProviderError::ModelNotFound { .. } => Some("Use 'kraftbot models' to see available models"),
            ProviderError::Timeout { .. } => {
                Some("Try a simpler request or raise REQUEST_TIMEOUT")
            }
            ProviderError::NetworkError { .. } => Some("Check your internet connection"),
            ProviderError::InvalidResponse { .. } => {
                Some("The model may not support this request. Try a different model")
            }
            _ => None,
        }
    }

    /// Create an API error from status code and message.
    pub fn api_error(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        ProviderError::ApiError {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_not_configured() {
        let err = Error::provider_not_configured("openrouter");
        assert!(err.to_string().contains("openrouter"));
        assert!(matches!(
            err,
            Error::Provider(ProviderError::NotConfigured { env_var: Some(ref v), .. }) if v == "OPENROUTER_API_KEY"
        ));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_api_error() {
        let err = ProviderError::api_error("openrouter", 429, "Rate limited");
        assert!(err.to_string().contains("429"));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Prompt("missing".to_string());
        let formatted = format_error_with_suggestion(&err);
        assert!(formatted.starts_with("Prompt error: missing"));
        assert!(formatted.contains("Suggestion:"));

        let err = Error::Validation("bad".to_string());
        assert_eq!(format_error_with_suggestion(&err), "Validation error: bad");
    }
}
