//! `kraftbot prompts`: the system prompts on disk.

use kraftbot_core::PromptLoader;

use crate::output;
use crate::AppContext;

const PREVIEW_CHARS: usize = 100;

/// One line per prompt: validity mark, name and preview or error.
fn describe_prompts(loader: &PromptLoader) -> Vec<String> {
    let mut lines = Vec::new();
    for name in loader.list_available_prompts() {
        match loader.validate_prompt(&name) {
            Ok(()) => {
                let preview = loader
                    .load_prompt(&name)
                    .map(|content| output::preview(&content, PREVIEW_CHARS))
                    .unwrap_or_else(|_| "Error loading".to_string());
                lines.push(format!("✓ {}\n   {}", name, preview));
            }
            Err(e) => lines.push(format!("✗ {}\n   Error: {}", name, e)),
        }
    }
    lines
}

pub fn run(ctx: &AppContext) {
    let loader = PromptLoader::new(ctx.settings.prompts_dir());
    output::heading("Available System Prompts");

    let lines = describe_prompts(&loader);
    if lines.is_empty() {
        println!("{}", output::fail("No prompt files found"));
        println!("  Add .md files to {}", loader.prompts_dir().display());
        return;
    }
    for line in lines {
        println!("\n{}", line);
    }

    println!("\nUsage:   kraftbot chat --prompt <name_or_path>");
    println!("Example: kraftbot chat --prompt aggressive");
    println!("Example: kraftbot chat --prompt /path/to/my_prompt.md");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_prompts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("aggressive.md"), "# Aggressive\n\nTake **risks**.").unwrap();
        std::fs::write(dir.path().join("blank.md"), "   \n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let lines = describe_prompts(&PromptLoader::new(dir.path()));

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("✓ aggressive"));
        assert!(lines[0].contains("Take risks."));
        assert!(lines[1].starts_with("✗ blank"));
        assert!(lines[1].contains("empty"));
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let loader = PromptLoader::new("/nonexistent/kraftbot/prompts");
        assert!(describe_prompts(&loader).is_empty());
    }
}
