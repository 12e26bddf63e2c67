//! Settings for KraftBot.
//!
//! Settings are loaded once at process start and passed by reference to
//! whatever needs them. Sources, lowest priority first:
//! built-in defaults, `~/.config/kraftbot/config.toml`, `./kraftbot.toml`,
//! then environment variables (a `.env` file in the working directory is
//! read into the environment first).

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::ModelConfig;

/// Environment variables recognised as settings overrides.
const ENV_KEYS: &[&str] = &[
    "openrouter_api_key",
    "openrouter_base_url",
    "logfire_write_token",
    "default_model",
    "default_user_id",
    "enable_logfire",
    "verbose",
    "cli_width",
    "cli_color",
    "cli_animations",
    "max_response_tokens",
    "request_timeout",
    "prompts_dir",
    "default_system_prompt_file",
    "mcp_server_command",
    "mcp_server_args",
    "enable_mcp_server",
];

/// Default OpenRouter API base URL.
pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// OpenRouter API key
    pub openrouter_api_key: Option<String>,
    /// OpenRouter API base URL
    pub openrouter_base_url: String,
    /// Logfire write token (reported by `status`, not exported to)
    pub logfire_write_token: Option<String>,

    /// Model used when none is given on the command line
    pub default_model: String,
    /// User id used for session tracking
    pub default_user_id: String,

    /// Observability toggle
    pub enable_logfire: bool,
    /// Verbose logging
    pub verbose: bool,

    /// Terminal width used for previews
    pub cli_width: u16,
    /// Colored output; off also when stdout is not a terminal
    pub cli_color: bool,
    /// Spinner and a short pause while the agent starts
    pub cli_animations: bool,

    /// Maximum tokens per response
    pub max_response_tokens: u32,
    /// Seconds before a single chat turn is abandoned
    pub request_timeout: u64,

    /// Directory holding `*.md` system prompts
    pub prompts_dir: Option<PathBuf>,
    /// System prompt used when `--prompt` is not given
    pub default_system_prompt_file: Option<String>,

    /// Command of the legacy single stdio MCP server
    pub mcp_server_command: String,
    /// Whitespace-separated arguments of the legacy stdio MCP server
    pub mcp_server_args: String,
    /// Whether MCP servers are attached to the agent
    pub enable_mcp_server: bool,

    /// Model catalog, in display order
    pub available_models: Vec<ModelConfig>,
    /// MCP server table
    pub mcp: McpSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            openrouter_base_url: OPENROUTER_API_URL.to_string(),
            logfire_write_token: None,
            default_model: "anthropic/claude-3.5-sonnet".to_string(),
            default_user_id: "cli_user".to_string(),
            enable_logfire: true,
            verbose: false,
            cli_width: 120,
            cli_color: true,
            cli_animations: true,
            max_response_tokens: 2000,
            request_timeout: 60,
            prompts_dir: None,
            default_system_prompt_file: None,
            mcp_server_command: "python".to_string(),
            mcp_server_args: "-m sleeper_mcp_server".to_string(),
            enable_mcp_server: false,
            available_models: ModelConfig::defaults(),
            mcp: McpSettings::default(),
        }
    }
}

/// `[mcp]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    /// Servers declared as `[[mcp.servers]]` tables
    pub servers: Vec<McpServerSettings>,
}

/// One `[[mcp.servers]]` entry.
///
/// This is the raw options contract; validation happens when the entry is
/// turned into a descriptor by the MCP registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerSettings {
    /// Explicit server name (derived from the command or URL when absent)
    #[serde(default)]
    pub name: Option<String>,
    /// "stdio", "sse" or "http"
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Command to launch (stdio)
    #[serde(default)]
    pub command: Option<String>,
    /// Command arguments (stdio)
    #[serde(default)]
    pub args: Vec<String>,
    /// Endpoint URL (sse/http)
    #[serde(default)]
    pub url: Option<String>,
    /// Prefix applied to every tool name of this server
    #[serde(default)]
    pub tool_prefix: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Whether the server may request sampling
    #[serde(default)]
    pub allow_sampling: Option<bool>,
    /// Abort agent setup when this server cannot be registered or reached
    #[serde(default)]
    pub required: bool,
}

fn default_transport() -> String {
    "stdio".to_string()
}

impl McpServerSettings {
    /// A stdio entry.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: None,
            transport: "stdio".to_string(),
            command: Some(command.into()),
            args,
            url: None,
            tool_prefix: None,
            timeout: None,
            allow_sampling: None,
            required: false,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "max_response_tokens")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

/// One row of the environment report shown by `kraftbot status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentCheck {
    /// Setting name (e.g., "openrouter_api_key")
    pub key: &'static str,
    /// Whether the setting has a usable value
    pub configured: bool,
    /// Whether the client can run without it
    pub required: bool,
    /// Short status label
    pub status: &'static str,
    /// Displayable value, for non-secret settings
    pub value: Option<String>,
}

impl Settings {
    /// Figment holding every settings source.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file("kraftbot.toml"))
            .merge(Env::raw().only(ENV_KEYS))
    }

    /// Load settings from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::figment().extract()
    }

    /// Load and validate settings.
    pub fn load_validated() -> Result<Self, Error> {
        let settings = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        let result = settings.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Settings validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Settings warning - {}: {}", warning.field, warning.message);
        }

        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.default_model.is_empty() {
            result.add_error("default_model", "Model name cannot be empty");
        } else if self.get_model_config(&self.default_model).is_none() {
            result.add_warning(
                "default_model",
                format!("'{}' is not in the model catalog", self.default_model),
            );
        }

        if self.max_response_tokens == 0 {
            result.add_error("max_response_tokens", "max_response_tokens must be greater than 0");
        }

        if self.request_timeout == 0 {
            result.add_error("request_timeout", "request_timeout must be greater than 0");
        }

        if self.cli_width < 40 {
            result.add_warning("cli_width", "cli_width below 40 columns will wrap badly");
        }

        if !self.openrouter_base_url.starts_with("http://")
            && !self.openrouter_base_url.starts_with("https://")
        {
            result.add_error(
                "openrouter_base_url",
                "openrouter_base_url must start with http:// or https://",
            );
        }

        if self.openrouter_api_key.as_deref().map(str::is_empty).unwrap_or(false) {
            result.add_warning("openrouter_api_key", "API key is empty string");
        }

        let valid_transports = ["stdio", "sse", "http"];
        for (i, server) in self.mcp.servers.iter().enumerate() {
            if !valid_transports.contains(&server.transport.as_str()) {
                result.add_error(
                    format!("mcp.servers[{}].transport", i),
                    format!(
                        "Invalid transport '{}'. Valid values: {:?}",
                        server.transport, valid_transports
                    ),
                );
            }
        }

        result
    }

    /// Get configuration for a specific model.
    pub fn get_model_config(&self, model_name: &str) -> Option<&ModelConfig> {
        self.available_models.iter().find(|m| m.name == model_name)
    }

    /// Names of the catalog models, in display order.
    pub fn available_model_names(&self) -> Vec<&str> {
        self.available_models.iter().map(|m| m.name.as_str()).collect()
    }

    /// Check if the OpenRouter API key is configured.
    pub fn is_api_key_configured(&self) -> bool {
        self.openrouter_api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }

    /// Check if Logfire is configured.
    pub fn is_logfire_configured(&self) -> bool {
        self.enable_logfire
            && self.logfire_write_token.as_deref().map(|t| !t.is_empty()).unwrap_or(false)
    }

    /// Environment report: API key, observability token and default model.
    pub fn environment_status(&self) -> Vec<EnvironmentCheck> {
        let default_model_valid = self.get_model_config(&self.default_model).is_some();
        vec![
            EnvironmentCheck {
                key: "openrouter_api_key",
                configured: self.is_api_key_configured(),
                required: true,
                status: if self.is_api_key_configured() { "Ready" } else { "Missing" },
                value: None,
            },
            EnvironmentCheck {
                key: "logfire_token",
                configured: self.logfire_write_token.is_some(),
                required: false,
                status: if self.logfire_write_token.is_some() { "Enabled" } else { "Disabled" },
                value: None,
            },
            EnvironmentCheck {
                key: "default_model",
                configured: default_model_valid,
                required: true,
                status: if default_model_valid { "Valid" } else { "Invalid" },
                value: Some(self.default_model.clone()),
            },
        ]
    }

    /// MCP servers to attach to the agent.
    ///
    /// Empty when MCP is disabled. Without `[[mcp.servers]]` tables the
    /// legacy single stdio server from `mcp_server_command` /
    /// `mcp_server_args` is used.
    pub fn mcp_servers(&self) -> Vec<McpServerSettings> {
        if !self.enable_mcp_server {
            return Vec::new();
        }
        if !self.mcp.servers.is_empty() {
            return self.mcp.servers.clone();
        }
        let args = self
            .mcp_server_args
            .split_whitespace()
            .map(str::to_string)
            .collect();
        vec![McpServerSettings::stdio(&self.mcp_server_command, args)]
    }

    /// Bound for a single chat turn.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Directory searched for named prompts.
    pub fn prompts_dir(&self) -> PathBuf {
        self.prompts_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("prompts"))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("kraftbot"))
            .unwrap_or_else(|| PathBuf::from("~/.config/kraftbot"))
    }
}
