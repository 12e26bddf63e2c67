//! System prompt loading from Markdown files.
//!
//! A prompt is referenced either by name (`aggressive` resolves to
//! `<prompts_dir>/aggressive.md`) or by path (anything absolute or containing
//! a path separator). Markdown emphasis, headers and code fences are
//! stripped before the text is handed to the model.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

static HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s*(.+)$").expect("valid regex"));
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.+?)\*").expect("valid regex"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`(.+?)`").expect("valid regex"));
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```.*$").expect("valid regex"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n\s*\n").expect("valid regex"));

/// Loads system prompts from a directory of Markdown files.
#[derive(Debug, Clone)]
pub struct PromptLoader {
    prompts_dir: PathBuf,
}

impl PromptLoader {
    /// Create a loader rooted at `prompts_dir`.
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
        }
    }

    /// The directory searched for named prompts.
    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    /// Resolve a prompt name or path to a file path.
    pub fn resolve(&self, name_or_path: &str) -> PathBuf {
        let looks_like_path = Path::new(name_or_path).is_absolute()
            || name_or_path.contains('/')
            || name_or_path.contains('\\');

        if looks_like_path {
            PathBuf::from(name_or_path)
        } else if name_or_path.ends_with(".md") {
            self.prompts_dir.join(name_or_path)
        } else {
            self.prompts_dir.join(format!("{}.md", name_or_path))
        }
    }

    /// Load and clean a prompt.
    pub fn load_prompt(&self, name_or_path: &str) -> Result<String> {
        let path = self.resolve(name_or_path);
        if !path.exists() {
            return Err(Error::Prompt(format!("Prompt file '{}' not found", name_or_path)));
        }

        debug!(path = %path.display(), "Loading system prompt");
        let content = std::fs::read_to_string(&path)?;
        Ok(clean_markdown(&content).trim().to_string())
    }

    /// Names of the prompts in the prompts directory, sorted.
    pub fn list_available_prompts(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.prompts_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut prompts: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().map(|e| e == "md").unwrap_or(false))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();

        prompts.sort();
        prompts
    }

    /// Check that a prompt exists and is not empty after cleanup.
    pub fn validate_prompt(&self, name_or_path: &str) -> Result<()> {
        let content = self.load_prompt(name_or_path)?;
        if content.trim().is_empty() {
            return Err(Error::Prompt(format!("Prompt file '{}' is empty", name_or_path)));
        }
        Ok(())
    }
}

/// Strip Markdown formatting that gets in the way of a system prompt.
pub fn clean_markdown(content: &str) -> String {
    let content = HEADER.replace_all(content, "${1}");
    let content = BOLD.replace_all(&content, "${1}");
    let content = ITALIC.replace_all(&content, "${1}");
    let content = INLINE_CODE.replace_all(&content, "${1}");
    let content = CODE_FENCE.replace_all(&content, "");
    BLANK_RUN.replace_all(&content, "\n\n").into_owned()
}
