//! A merged tool namespace over several tool sources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use kraftbot_core::{ToolCall, ToolDefinition, ToolResult};
use tracing::{debug, warn};

use crate::error::McpError;
use crate::protocol::McpToolDefinition;
use crate::source::ToolSource;

/// A source that could not be listed during discovery.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub server: String,
    pub error: McpError,
}

struct IndexedTool {
    source: Arc<dyn ToolSource>,
    tool_name: String,
}

/// The tools of an ordered list of sources, addressed by prefixed name.
///
/// When two sources expose the same prefixed name, the source that comes
/// first in the list wins and the later tool is skipped with a warning.
pub struct Toolset {
    sources: Vec<Arc<dyn ToolSource>>,
    definitions: Vec<ToolDefinition>,
    index: HashMap<String, IndexedTool>,
}

impl Toolset {
    /// Wrap a snapshot of sources. No source is contacted until [`discover`](Self::discover).
    pub fn new(sources: Vec<Arc<dyn ToolSource>>) -> Self {
        Self {
            sources,
            definitions: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// A toolset with no sources.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn sources(&self) -> &[Arc<dyn ToolSource>] {
        &self.sources
    }

    /// Number of discovered tools.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions of every discovered tool, in source order.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// List the tools of every source and rebuild the namespace.
    ///
    /// Sources that fail are skipped and reported back to the caller.
    pub async fn discover(&mut self) -> Vec<DiscoveryFailure> {
        self.definitions.clear();
        self.index.clear();

        let mut failures = Vec::new();
        let sources = self.sources.clone();
        for source in sources {
            match source.list_tools().await {
                Ok(tools) => self.add_tools(&source, tools),
                Err(error) => {
                    warn!(server = %source.name(), error = %error, "Failed to list MCP tools");
                    failures.push(DiscoveryFailure {
                        server: source.name().to_string(),
                        error,
                    });
                }
            }
        }

        debug!(tools = self.definitions.len(), sources = self.sources.len(), "MCP tool discovery finished");
        failures
    }

    fn add_tools(&mut self, source: &Arc<dyn ToolSource>, tools: Vec<McpToolDefinition>) {
        for tool in tools {
            let name = source.prefixed_name(&tool.name);
            if let Some(existing) = self.index.get(&name) {
                warn!(
                    tool = %name,
                    kept = %existing.source.name(),
                    skipped = %source.name(),
                    "Duplicate tool name, keeping the first registration"
                );
                continue;
            }

            let description = tool
                .description
                .clone()
                .unwrap_or_else(|| format!("MCP tool from {}", source.name()));
            self.definitions
                .push(ToolDefinition::new(&name, description).with_parameters(tool.input_schema));
            self.index.insert(
                name,
                IndexedTool {
                    source: Arc::clone(source),
                    tool_name: tool.name,
                },
            );
        }
    }

    /// Execute a tool call against the source that owns the tool.
    ///
    /// Failures come back as an error [`ToolResult`] so the model can see them.
    pub async fn call(&self, call: &ToolCall) -> ToolResult {
        let Some(indexed) = self.index.get(&call.name) else {
            return ToolResult::error(&call.id, McpError::ToolNotFound(call.name.clone()).to_string());
        };

        let start = Instant::now();
        let arguments = match &call.arguments {
            serde_json::Value::Null => None,
            other => Some(other.clone()),
        };
        let outcome = indexed.source.call_tool(&indexed.tool_name, arguments).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) if result.is_error => ToolResult::error(&call.id, result.text()).with_duration(duration_ms),
            Ok(result) => ToolResult::success(&call.id, result.text()).with_duration(duration_ms),
            Err(e) => {
                warn!(tool = %call.name, server = %indexed.source.name(), error = %e, "MCP tool call failed");
                ToolResult::error(&call.id, e.to_string()).with_duration(duration_ms)
            }
        }
    }
}

impl Default for Toolset {
    fn default() -> Self {
        Self::empty()
    }
}
