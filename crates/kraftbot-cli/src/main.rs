//! # kraftbot-cli
//!
//! Command-line interface for KraftBot.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kraftbot_core::Settings;

mod commands;
mod output;

/// Application context containing shared state.
pub struct AppContext {
    pub settings: Settings,
}

/// KraftBot - fantasy football chat agent with MCP tools
#[derive(Parser)]
#[command(name = "kraftbot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Model to use (defaults to the configured default model)
        #[arg(short, long)]
        model: Option<String>,
        /// System prompt name (e.g. 'aggressive') or file path
        #[arg(short, long)]
        prompt: Option<String>,
        /// User ID sent with each request
        #[arg(short, long = "user")]
        user: Option<String>,
    },
    /// List available models and their capabilities
    Models,
    /// Test a model with a single prompt
    Test {
        /// Model to test (defaults to the configured default model)
        #[arg(short, long)]
        model: Option<String>,
        /// Prompt to send
        #[arg(short, long, default_value = "Hello! Please introduce yourself briefly.")]
        prompt: String,
        /// System prompt name or file path
        #[arg(short, long)]
        system_prompt: Option<String>,
    },
    /// Compare responses from several models
    Compare {
        /// Prompt sent to every model
        #[arg(short, long, default_value = "Explain quantum computing in simple terms")]
        prompt: String,
        /// Models to compare (repeatable; defaults to the first three catalog models)
        #[arg(short, long = "model")]
        models: Vec<String>,
    },
    /// Show MCP transports and the configured servers
    Mcp,
    /// Show system status and configuration
    Status,
    /// List available system prompts
    Prompts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Settings are loaded once and passed down by reference
    let (settings, load_error) = match Settings::load() {
        Ok(settings) => (settings, None),
        Err(e) => (Settings::default(), Some(e)),
    };

    // Chat output stays clean unless verbose logging is requested
    let level = if cli.verbose || settings.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Some(e) = load_error {
        tracing::warn!("Failed to load settings, using defaults: {}", e);
    }
    for warning in settings.validate().warnings() {
        tracing::warn!("Settings warning - {}: {}", warning.field, warning.message);
    }

    output::apply_color_setting(&settings);
    let ctx = AppContext { settings };

    match cli.command {
        Commands::Chat { model, prompt, user } => {
            commands::chat::run(&ctx, model, prompt, user).await?;
        }
        Commands::Models => {
            commands::models::run(&ctx);
        }
        Commands::Test {
            model,
            prompt,
            system_prompt,
        } => {
            commands::test::run(&ctx, model, &prompt, system_prompt).await?;
        }
        Commands::Compare { prompt, models } => {
            commands::compare::run(&ctx, &prompt, models).await?;
        }
        Commands::Mcp => {
            commands::mcp::run(&ctx);
        }
        Commands::Status => {
            commands::status::run(&ctx);
        }
        Commands::Prompts => {
            commands::prompts::run(&ctx);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat_options() {
        let cli = Cli::parse_from(["kraftbot", "chat", "-m", "openai/gpt-4", "-p", "aggressive", "-u", "sam"]);
        match cli.command {
            Commands::Chat { model, prompt, user } => {
                assert_eq!(model.as_deref(), Some("openai/gpt-4"));
                assert_eq!(prompt.as_deref(), Some("aggressive"));
                assert_eq!(user.as_deref(), Some("sam"));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_parse_compare_models() {
        let cli = Cli::parse_from(["kraftbot", "compare", "-m", "a/one", "-m", "b/two", "--verbose"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Compare { prompt, models } => {
                assert_eq!(prompt, "Explain quantum computing in simple terms");
                assert_eq!(models, vec!["a/one", "b/two"]);
            }
            _ => panic!("expected compare"),
        }
    }

    #[test]
    fn test_parse_test_defaults() {
        let cli = Cli::parse_from(["kraftbot", "test", "-s", "/tmp/prompt.md"]);
        match cli.command {
            Commands::Test {
                model,
                prompt,
                system_prompt,
            } => {
                assert!(model.is_none());
                assert!(prompt.starts_with("Hello!"));
                assert_eq!(system_prompt.as_deref(), Some("/tmp/prompt.md"));
            }
            _ => panic!("expected test"),
        }
    }
}
