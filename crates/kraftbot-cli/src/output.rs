//! Terminal output shared by the commands.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use kraftbot_agent::{build_agent, Agent, AgentEventHandler, AgentOptions, AgentResponse};
use kraftbot_core::{Settings, ToolCall, ToolResult};

const RULE: &str = "════════════════════════════════════════════════════════════";

const STARTUP_PAUSE: Duration = Duration::from_secs(1);

/// Turn styling off when the settings ask for plain output.
///
/// With `cli_color` on, styling still follows terminal detection.
pub fn apply_color_setting(settings: &Settings) {
    if !settings.cli_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
}

/// `✓ text` in green.
pub fn ok(text: impl std::fmt::Display) -> String {
    format!("{} {}", style("✓").green(), text)
}

/// `✗ text` in red.
pub fn fail(text: impl std::fmt::Display) -> String {
    format!("{} {}", style("✗").red(), style(text).red())
}

/// `! text` in yellow.
pub fn warn(text: impl std::fmt::Display) -> String {
    format!("{} {}", style("!").yellow(), style(text).yellow())
}

/// Print the startup banner.
pub fn print_banner() {
    let line = |text: String| println!("{}", style(text).magenta().bold());
    line("╔══════════════════════════════════════════════════════════════╗".to_string());
    line(format!("║  KraftBot v{:<50}║", env!("CARGO_PKG_VERSION")));
    line("║  Fantasy Football Management Agent                           ║".to_string());
    line("╚══════════════════════════════════════════════════════════════╝".to_string());
    println!();
}

/// Print a section heading.
pub fn heading(title: &str) {
    println!("\n{}", style(title).bold().cyan());
    println!("{}", RULE);
}

/// First `max` characters of `text`, with `...` when cut.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Print the environment report. Returns whether chatting is possible.
pub fn check_environment(settings: &Settings) -> bool {
    println!("{}", style("Environment Check").bold());
    for check in settings.environment_status() {
        let mark = if check.configured {
            style("✓").green()
        } else if check.required {
            style("✗").red()
        } else {
            style("-").dim()
        };
        match &check.value {
            Some(value) => println!("  {} {:<20} {} ({})", mark, title_case(check.key), check.status, value),
            None => println!("  {} {:<20} {}", mark, title_case(check.key), check.status),
        }
    }
    println!();

    if !settings.is_api_key_configured() {
        println!("{}", fail("OPENROUTER_API_KEY not found!"));
        println!("  Get your API key from: https://openrouter.ai/");
        return false;
    }
    true
}

fn title_case(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// How long startup lingers on the spinner.
pub fn startup_pause(settings: &Settings) -> Duration {
    if settings.cli_animations {
        STARTUP_PAUSE
    } else {
        Duration::ZERO
    }
}

fn startup_spinner(settings: &Settings) -> Option<ProgressBar> {
    if !settings.cli_animations {
        println!("Initializing KraftBot agent...");
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message("Initializing KraftBot agent...");
    spinner.enable_steady_tick(Duration::from_millis(80));
    Some(spinner)
}

/// Build an agent and report what happened along the way.
///
/// Returns `None` after printing the reason when no agent could be built.
/// The handler is the one the agent reports progress to.
pub async fn prepare_agent(settings: &Settings, options: AgentOptions) -> Option<(Agent, Arc<CliEventHandler>)> {
    let requested_prompt = options.prompt.clone();
    let spinner = startup_spinner(settings);

    let setup = build_agent(settings, options).await;
    if let Some(spinner) = spinner {
        if setup.is_ok() {
            tokio::time::sleep(startup_pause(settings)).await;
        }
        spinner.finish_and_clear();
    }
    let setup = match setup {
        Ok(setup) => setup,
        Err(e) => {
            println!("{}", fail(format!("Failed to initialize agent: {}", e)));
            return None;
        }
    };

    if let Some(prompt) = &setup.loaded_prompt {
        println!("{}", ok(format!("Loaded system prompt: {}", prompt)));
    } else if let (Some(prompt), Some(_)) = (&requested_prompt, &setup.prompt_error) {
        println!("{}", warn(format!("Could not load prompt '{}', using default", prompt)));
    }
    for failure in &setup.skipped_servers {
        println!("{}", warn(format!("MCP server '{}' unavailable: {}", failure.server, failure.error)));
    }

    let events = Arc::new(CliEventHandler::new());
    let mut agent = setup.agent;
    agent.set_event_handler(events.clone());
    if settings.verbose {
        println!("  Model:         {}", agent.model());
        if let Some(model) = settings.get_model_config(agent.model()) {
            println!("  Provider:      {}", model.provider);
        }
        println!("  Transport:     OpenRouter");
        println!("  MCP servers:   {}", agent.sources().len());
        println!("  Tools:         {}", agent.tools().len());
        println!(
            "  Observability: {}",
            if settings.is_logfire_configured() { "Enabled" } else { "Disabled" }
        );
    }

    println!("{}", ok(style("KraftBot initialized successfully!").green().bold()));
    Some((agent, events))
}

/// Print an agent response with its timing.
fn display_response(response: &AgentResponse, elapsed: Duration) {
    println!("\n{} ({:.1}s):", style("KraftBot").bold(), elapsed.as_secs_f64());
    println!("{}", response.response);
    print_stats(response);
}

fn print_stats(response: &AgentResponse) {
    if response.tool_calls > 0 {
        println!(
            "{}",
            style(format!(
                "[{} tool call(s) | {} tokens]",
                response.tool_calls,
                response.usage.total()
            ))
            .dim()
        );
    }
}

/// Answer a prompt, printing text as it streams in.
///
/// When nothing streamed (a fallback or an early failure) the whole
/// response is printed instead.
pub async fn stream_response(agent: &mut Agent, events: &CliEventHandler, prompt: &str) -> AgentResponse {
    let start = Instant::now();
    events.take_streamed();
    let response = agent.run_stream(prompt).await;

    if events.take_streamed() {
        println!();
        if response.is_error() {
            println!("{}", response.response);
        }
        println!("{}", style(format!("({:.1}s)", start.elapsed().as_secs_f64())).dim());
        print_stats(&response);
    } else {
        display_response(&response, start.elapsed());
    }
    response
}

/// Prints streamed text to stdout and tool activity to stderr.
pub struct CliEventHandler {
    tool_start: Mutex<Option<Instant>>,
    streamed: AtomicBool,
    mid_line: AtomicBool,
}

impl CliEventHandler {
    pub fn new() -> Self {
        Self {
            tool_start: Mutex::new(None),
            streamed: AtomicBool::new(false),
            mid_line: AtomicBool::new(false),
        }
    }

    /// Whether text streamed since the last call.
    pub fn take_streamed(&self) -> bool {
        self.mid_line.store(false, Ordering::SeqCst);
        self.streamed.swap(false, Ordering::SeqCst)
    }
}

impl Default for CliEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentEventHandler for CliEventHandler {
    fn on_text_delta(&self, delta: &str) {
        if !self.streamed.swap(true, Ordering::SeqCst) {
            println!("\n{}", style("KraftBot:").bold());
        }
        self.mid_line.store(!delta.ends_with('\n'), Ordering::SeqCst);
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    }

    fn on_tool_start(&self, call: &ToolCall) {
        if self.mid_line.swap(false, Ordering::SeqCst) {
            println!();
        }
        if let Ok(mut start) = self.tool_start.lock() {
            *start = Some(Instant::now());
        }
        eprintln!("[Tool: {}] Starting...", call.name);
    }

    fn on_tool_complete(&self, call: &ToolCall, result: &ToolResult) {
        let duration = self
            .tool_start
            .lock()
            .ok()
            .and_then(|mut start| start.take())
            .map(|start| start.elapsed().as_millis())
            .unwrap_or(result.duration_ms as u128);

        let status = if result.success {
            style("OK").green()
        } else {
            style("FAILED").red()
        };
        eprintln!("[Tool: {}] {} ({}ms)", call.name, status, duration);

        if let Some(error) = &result.error {
            eprintln!("{}", style(format!("[Error: {}]", error)).red());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ééééé", 2), "éé...");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("openrouter_api_key"), "Openrouter Api Key");
        assert_eq!(title_case("default_model"), "Default Model");
    }

    #[test]
    fn test_plain_output_when_color_is_off() {
        let settings = Settings {
            cli_color: false,
            ..Settings::default()
        };
        apply_color_setting(&settings);
        assert!(!console::colors_enabled());
        assert_eq!(ok("ready"), "✓ ready");
        assert_eq!(fail("no key"), "✗ no key");
        assert_eq!(warn("skipped"), "! skipped");
    }

    #[test]
    fn test_startup_pause_follows_animations() {
        assert_eq!(startup_pause(&Settings::default()), Duration::from_secs(1));

        let settings = Settings {
            cli_animations: false,
            ..Settings::default()
        };
        assert_eq!(startup_pause(&settings), Duration::ZERO);
        assert!(startup_spinner(&settings).is_none());
    }

    #[test]
    fn test_streamed_flag_resets() {
        let handler = CliEventHandler::new();
        assert!(!handler.take_streamed());

        handler.on_text_delta("Start ");
        handler.on_text_delta("him.");
        assert!(handler.take_streamed());
        assert!(!handler.take_streamed());
    }

    #[test]
    fn test_check_environment_requires_key() {
        let settings = Settings::default();
        assert!(!check_environment(&settings));

        let settings = Settings {
            openrouter_api_key: Some("sk-or-test".into()),
            ..Settings::default()
        };
        assert!(check_environment(&settings));
    }
}
