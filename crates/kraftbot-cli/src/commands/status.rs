//! `kraftbot status`: system information and configuration report.

use kraftbot_core::Settings;

use crate::output;
use crate::AppContext;

/// Status text for one setting: secrets show their first 8 characters only.
fn describe(name: &str, value: Option<&str>) -> String {
    match value.filter(|v| !v.is_empty()) {
        Some(v) if name.contains("KEY") || name.contains("TOKEN") => {
            format!("✓ Set ({}...)", v.chars().take(8).collect::<String>())
        }
        Some(v) => format!("✓ {}", output::preview(v, 50)),
        None => "✗ Not set".to_string(),
    }
}

fn environment_rows(settings: &Settings) -> Vec<(&'static str, String)> {
    let width = settings.cli_width.to_string();
    vec![
        ("OPENROUTER_API_KEY", describe("OPENROUTER_API_KEY", settings.openrouter_api_key.as_deref())),
        ("LOGFIRE_WRITE_TOKEN", describe("LOGFIRE_WRITE_TOKEN", settings.logfire_write_token.as_deref())),
        ("DEFAULT_MODEL", describe("DEFAULT_MODEL", Some(&settings.default_model))),
        ("CLI_WIDTH", describe("CLI_WIDTH", Some(&width))),
    ]
}

pub fn run(ctx: &AppContext) {
    let settings = &ctx.settings;
    output::print_banner();

    output::heading("System Information");
    println!("  Operating System   {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    println!("  KraftBot Version   {}", env!("CARGO_PKG_VERSION"));
    println!("  Current Time       {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    match std::env::current_dir() {
        Ok(dir) => println!("  Working Directory  {}", dir.display()),
        Err(_) => println!("  Working Directory  (unavailable)"),
    }
    println!("  Config Directory   {}", Settings::config_dir().display());
    println!("  Prompts Directory  {}", settings.prompts_dir().display());

    output::heading("Environment Configuration");
    for (name, status) in environment_rows(settings) {
        println!("  {:<20} {}", name, status);
    }

    output::heading("Service Status");
    output::check_environment(settings);

    let validation = settings.validate();
    if !validation.issues.is_empty() {
        output::heading("Settings Issues");
        for issue in &validation.issues {
            println!("  {:?} {}: {}", issue.severity, issue.field, issue.message);
        }
    }

    println!(
        "MCP servers: {}",
        if settings.enable_mcp_server {
            format!("enabled ({} configured)", settings.mcp_servers().len())
        } else {
            "disabled".to_string()
        }
    );
    println!("Request timeout: {}s", settings.request_timeout);
}
