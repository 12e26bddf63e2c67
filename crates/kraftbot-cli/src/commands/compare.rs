//! `kraftbot compare`: the same prompt across several models.

use std::time::{Duration, Instant};

use anyhow::bail;

use kraftbot_agent::{AgentOptions, AgentResponse};
use kraftbot_core::Settings;

use crate::output;
use crate::AppContext;

const PREVIEW_CHARS: usize = 200;
const DEFAULT_MODEL_COUNT: usize = 3;

enum Outcome {
    Answered(AgentResponse, Duration),
    Failed(String),
}

/// The models to compare: the requested ones, or the head of the catalog.
fn select_models(settings: &Settings, requested: Vec<String>) -> Vec<String> {
    if !requested.is_empty() {
        return requested;
    }
    settings
        .available_model_names()
        .into_iter()
        .take(DEFAULT_MODEL_COUNT)
        .map(str::to_string)
        .collect()
}

pub async fn run(ctx: &AppContext, prompt: &str, models: Vec<String>) -> anyhow::Result<()> {
    output::print_banner();

    if !output::check_environment(&ctx.settings) {
        bail!("OPENROUTER_API_KEY is not configured");
    }

    let models = select_models(&ctx.settings, models);
    println!("Comparing {} models", models.len());
    println!("Prompt: {}\n", prompt);

    let mut results = Vec::with_capacity(models.len());
    for (i, model) in models.iter().enumerate() {
        println!("[{}/{}] Testing {}", i + 1, models.len(), model);

        let options = AgentOptions {
            model: Some(model.clone()),
            prompt: None,
            user: Some("compare_user".to_string()),
        };
        let outcome = match output::prepare_agent(&ctx.settings, options).await {
            Some((mut agent, _)) => {
                let start = Instant::now();
                let response = agent.run(prompt).await;
                agent.close().await;
                Outcome::Answered(response, start.elapsed())
            }
            None => Outcome::Failed("Initialization failed".to_string()),
        };
        results.push((model, outcome));
    }

    output::heading("Comparison Results");
    for (i, (model, outcome)) in results.iter().enumerate() {
        println!("\nModel {}: {}", i + 1, model);
        match outcome {
            Outcome::Answered(response, elapsed) => {
                println!("Response Preview ({:.1}s):", elapsed.as_secs_f64());
                println!("  {}", output::preview(&response.response, PREVIEW_CHARS));
            }
            Outcome::Failed(reason) => println!("{}", output::fail(format!("Error: {}", reason))),
        }
    }

    Ok(())
}
