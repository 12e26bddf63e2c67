//! `kraftbot models`: the model catalog.

use crate::output;
use crate::AppContext;

pub fn run(ctx: &AppContext) {
    output::print_banner();
    output::heading("Available Models via OpenRouter");

    println!(
        "{:<36} {:<12} {:<30} {:<8} {:<8}",
        "Model", "Provider", "Strengths", "Speed", "Cost"
    );
    for model in &ctx.settings.available_models {
        let marker = if model.name == ctx.settings.default_model { "*" } else { " " };
        println!(
            "{}{:<35} {:<12} {:<30} {:<8} {:<8}",
            marker,
            model.name,
            model.provider,
            model.strengths.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
            model.speed,
            model.cost
        );
    }

    println!("\n* default model");
    println!("Use --model to choose which model to use");
}
