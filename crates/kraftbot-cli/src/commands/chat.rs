//! `kraftbot chat`: the interactive REPL.

use std::path::PathBuf;

use anyhow::bail;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use kraftbot_agent::AgentOptions;

use crate::output;
use crate::AppContext;

const GOODBYE: &str = "Thanks for chatting with KraftBot!";

/// Whether a line ends the session.
fn is_exit_command(line: &str) -> bool {
    matches!(line.to_lowercase().as_str(), "quit" | "exit" | "q")
}

pub async fn run(
    ctx: &AppContext,
    model: Option<String>,
    prompt: Option<String>,
    user: Option<String>,
) -> anyhow::Result<()> {
    output::print_banner();

    if !output::check_environment(&ctx.settings) {
        bail!("OPENROUTER_API_KEY is not configured");
    }

    let options = AgentOptions { model, prompt, user };
    let Some((mut agent, events)) = output::prepare_agent(&ctx.settings, options).await else {
        bail!("agent initialization failed");
    };

    output::heading("Interactive Chat Mode");
    println!("Type 'quit', 'exit' or 'q' (or press Ctrl+D) to end the session");
    println!("Use Up/Down arrows to navigate command history\n");

    let mut editor = DefaultEditor::new()?;
    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
    }

    let mut message_count = 0;
    loop {
        match editor.readline(&format!("You ({}): ", message_count + 1)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                if is_exit_command(line) {
                    println!("\n{}", GOODBYE);
                    break;
                }

                output::stream_response(&mut agent, &events, line).await;
                message_count += 1;
                println!();
            }
            Err(ReadlineError::Interrupted) => {
                println!("\nSession ended by user");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("\n{}", GOODBYE);
                break;
            }
            Err(err) => {
                eprintln!("{}", output::fail(format!("Error: {:?}", err)));
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = editor.save_history(&history_path);

    agent.close().await;
    Ok(())
}

/// Get the path to the history file.
fn history_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kraftbot")
        .join("history.txt")
}
