//! Registry of configured MCP servers.
//!
//! The manager maps unique server names to a descriptor and a tool-source
//! handle. Names are unique; registering an existing name replaces the
//! entry in place, so enumeration order stays the order in which names were
//! first registered. Removing a name and adding it again moves it to the end.

use std::sync::Arc;

use kraftbot_core::McpServerSettings;
use tracing::{debug, info, warn};

use crate::config::{
    default_remote_name, default_stdio_name, explicit_name, McpServerConfig, McpServerInfo,
    ServerOptions, TransportKind,
};
use crate::error::McpError;
use crate::source::{DefaultHandleFactory, HandleFactory, ToolSource};
use crate::toolset::Toolset;

struct Entry {
    config: McpServerConfig,
    handle: Arc<dyn ToolSource>,
}

/// Name-keyed, insertion-ordered registry of MCP servers.
pub struct McpManager<F = DefaultHandleFactory> {
    entries: Vec<Entry>,
    factory: F,
}

impl McpManager {
    /// Create an empty registry producing real, lazily connecting handles.
    pub fn new() -> Self {
        Self::with_factory(DefaultHandleFactory::new())
    }

    /// Build a registry from the MCP section of the settings.
    ///
    /// Invalid entries are skipped with a warning unless marked `required`,
    /// in which case the first such error is returned.
    pub fn from_settings(servers: &[McpServerSettings]) -> Result<Self, McpError> {
        Self::from_settings_with_factory(servers, DefaultHandleFactory::new())
    }
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: HandleFactory> McpManager<F> {
    /// Create an empty registry with a custom handle factory.
    pub fn with_factory(factory: F) -> Self {
        Self {
            entries: Vec::new(),
            factory,
        }
    }

    /// Like [`McpManager::from_settings`], with handles built by `factory`.
    pub fn from_settings_with_factory(servers: &[McpServerSettings], factory: F) -> Result<Self, McpError> {
        let mut manager = Self::with_factory(factory);
        for server in servers {
            match manager.add_from_settings(server) {
                Ok(name) => debug!(server = %name, "Registered MCP server from settings"),
                Err(e) if server.required => return Err(e),
                Err(e) => warn!(error = %e, "Skipping invalid MCP server entry"),
            }
        }
        Ok(manager)
    }

    /// Register a stdio server with default options.
    ///
    /// Without a name the server is called `stdio_` plus the command with
    /// `/` replaced by `_`. Returns the registered name.
    pub fn add_stdio_server<I, S>(
        &mut self,
        command: &str,
        args: I,
        tool_prefix: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, McpError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_stdio_server_with(command, args, tool_prefix, name, ServerOptions::default())
    }

    /// Register a stdio server with explicit options.
    pub fn add_stdio_server_with<I, S>(
        &mut self,
        command: &str,
        args: I,
        tool_prefix: Option<&str>,
        name: Option<&str>,
        options: ServerOptions,
    ) -> Result<String, McpError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = explicit_name(name).unwrap_or_else(|| default_stdio_name(command));
        let config = McpServerConfig::stdio(name, command, args)?
            .with_tool_prefix(tool_prefix)
            .with_options(options);
        Ok(self.add_server(config))
    }

    /// Register an SSE server with default options.
    ///
    /// Without a name the server is called `sse_` plus the URL after its
    /// scheme, with `/` and `:` replaced by `_`.
    pub fn add_sse_server(
        &mut self,
        url: &str,
        tool_prefix: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, McpError> {
        self.add_sse_server_with(url, tool_prefix, name, ServerOptions::default())
    }

    /// Register an SSE server with explicit options.
    pub fn add_sse_server_with(
        &mut self,
        url: &str,
        tool_prefix: Option<&str>,
        name: Option<&str>,
        options: ServerOptions,
    ) -> Result<String, McpError> {
        let name = explicit_name(name).unwrap_or_else(|| default_remote_name(TransportKind::Sse, url));
        let config = McpServerConfig::sse(name, url)?
            .with_tool_prefix(tool_prefix)
            .with_options(options);
        Ok(self.add_server(config))
    }

    /// Register a streamable HTTP server with default options.
    ///
    /// Default names follow the SSE rule with an `http_` prefix.
    pub fn add_http_server(
        &mut self,
        url: &str,
        tool_prefix: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, McpError> {
        self.add_http_server_with(url, tool_prefix, name, ServerOptions::default())
    }

    /// Register a streamable HTTP server with explicit options.
    pub fn add_http_server_with(
        &mut self,
        url: &str,
        tool_prefix: Option<&str>,
        name: Option<&str>,
        options: ServerOptions,
    ) -> Result<String, McpError> {
        let name = explicit_name(name).unwrap_or_else(|| default_remote_name(TransportKind::Http, url));
        let config = McpServerConfig::http(name, url)?
            .with_tool_prefix(tool_prefix)
            .with_options(options);
        Ok(self.add_server(config))
    }

    /// Register one `[[mcp.servers]]` settings entry.
    pub fn add_from_settings(&mut self, settings: &McpServerSettings) -> Result<String, McpError> {
        let config = McpServerConfig::from_settings(settings)?;
        Ok(self.add_server(config))
    }

    /// Register an already validated descriptor and return its name.
    ///
    /// An existing entry with the same name is replaced where it stands.
    pub fn add_server(&mut self, config: McpServerConfig) -> String {
        let name = config.name().to_string();
        let handle = self.factory.create(&config);
        let entry = Entry { config, handle };

        match self.entries.iter_mut().find(|e| e.config.name() == name) {
            Some(existing) => {
                info!(server = %name, "Replacing MCP server");
                *existing = entry;
            }
            None => {
                info!(server = %name, transport = %entry.config.transport(), "Registered MCP server");
                self.entries.push(entry);
            }
        }
        name
    }

    /// Unregister a server. Returns whether the name was present.
    ///
    /// Handles already given out keep working; only the registry forgets them.
    pub fn remove_server(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.config.name() != name);
        let removed = self.entries.len() < before;
        if removed {
            info!(server = %name, "Removed MCP server");
        }
        removed
    }

    /// Handles of every registered server, in registration order.
    pub fn get_servers(&self) -> Vec<Arc<dyn ToolSource>> {
        self.entries.iter().map(|e| Arc::clone(&e.handle)).collect()
    }

    /// Names of every registered server, in registration order.
    pub fn get_server_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.config.name().to_string()).collect()
    }

    pub fn get_server_by_name(&self, name: &str) -> Option<Arc<dyn ToolSource>> {
        self.entry(name).map(|e| Arc::clone(&e.handle))
    }

    pub fn get_config(&self, name: &str) -> Option<&McpServerConfig> {
        self.entry(name).map(|e| &e.config)
    }

    /// Display record for one server.
    pub fn get_server_info(&self, name: &str) -> Option<McpServerInfo> {
        self.entry(name).map(|e| e.config.info())
    }

    /// Display records for every server, in registration order.
    pub fn get_all_server_info(&self) -> Vec<McpServerInfo> {
        self.entries.iter().map(|e| e.config.info()).collect()
    }

    /// Placeholder tool names derived from configuration alone.
    ///
    /// One `example_tool` per server, prefixed when the server has a prefix.
    /// Real tool names are only known after discovery.
    pub fn get_available_tools(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.handle.prefixed_name("example_tool"))
            .collect()
    }

    /// Forget every server.
    pub fn clear_all_servers(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        info!(count = count, "Cleared all MCP servers");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// A toolset over a snapshot of the current handles.
    pub fn toolset(&self) -> Toolset {
        Toolset::new(self.get_servers())
    }

    /// Close every live session. Registrations are kept.
    pub async fn close_all(&self) {
        for entry in &self.entries {
            if let Err(e) = entry.handle.close().await {
                warn!(server = %entry.config.name(), error = %e, "Failed to close MCP server");
            }
        }
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.config.name() == name)
    }
}

impl<F> std::fmt::Debug for McpManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field(
                "servers",
                &self.entries.iter().map(|e| e.config.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CallToolResult, McpToolDefinition};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records every handle it creates without doing any I/O.
    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    struct InertSource {
        config: McpServerConfig,
    }

    #[async_trait]
    impl ToolSource for InertSource {
        fn name(&self) -> &str {
            self.config.name()
        }

        fn transport(&self) -> TransportKind {
            self.config.transport()
        }

        fn tool_prefix(&self) -> Option<&str> {
            self.config.tool_prefix()
        }

        async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, tool: &str, _arguments: Option<Value>) -> Result<CallToolResult, McpError> {
            Err(McpError::ToolNotFound(tool.to_string()))
        }

        async fn close(&self) -> Result<(), McpError> {
            Ok(())
        }
    }

    impl HandleFactory for CountingFactory {
        fn create(&self, config: &McpServerConfig) -> Arc<dyn ToolSource> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Arc::new(InertSource {
                config: config.clone(),
            })
        }
    }

    fn manager() -> McpManager<CountingFactory> {
        McpManager::with_factory(CountingFactory::default())
    }

    fn no_args() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn test_stdio_default_name() {
        let mut manager = manager();
        let name = manager
            .add_stdio_server("python", ["-m", "tool_server"], None, None)
            .unwrap();

        assert_eq!(name, "stdio_python");
        assert_eq!(manager.get_server_names(), vec!["stdio_python"]);

        let info = manager.get_server_info("stdio_python").unwrap();
        assert_eq!(info.transport_type, "stdio");
        assert_eq!(info.status, "connected");
        assert_eq!(info.tools_count, 0);
        assert!(info.tool_prefix.is_none());

        let config = manager.get_config("stdio_python").unwrap();
        assert_eq!(config.args(), ["-m", "tool_server"]);
    }

    #[test]
    fn test_sse_default_name() {
        let mut manager = manager();
        let name = manager
            .add_sse_server("http://localhost:3001/sse", Some("weather"), None)
            .unwrap();

        assert_eq!(name, "sse_localhost_3001_sse");
        let info = manager.get_server_info(&name).unwrap();
        assert_eq!(info.transport_type, "sse");
        assert_eq!(info.tool_prefix.as_deref(), Some("weather"));
        assert_eq!(manager.get_available_tools(), vec!["weather_example_tool"]);
    }

    #[test]
    fn test_http_default_name_and_explicit_name() {
        let mut manager = manager();
        let derived = manager.add_http_server("https://tools.example.com/mcp", None, None).unwrap();
        assert_eq!(derived, "http_tools.example.com_mcp");

        let named = manager
            .add_http_server("https://tools.example.com/mcp", None, Some("remote"))
            .unwrap();
        assert_eq!(named, "remote");
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_empty_explicit_name_falls_back_to_default() {
        let mut manager = manager();
        let name = manager.add_stdio_server("node", no_args(), None, Some("")).unwrap();
        assert_eq!(name, "stdio_node");
    }

    #[test]
    fn test_invalid_descriptor_registers_nothing() {
        let mut manager = manager();
        assert!(manager.add_sse_server("", None, None).is_err());
        assert!(manager.add_http_server("localhost:8000", None, Some("bad")).is_err());
        assert!(manager.add_stdio_server("", no_args(), None, Some("empty")).is_err());

        assert!(manager.is_empty());
        assert_eq!(manager.factory.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_name_replaces_in_place() {
        let mut manager = manager();
        manager.add_stdio_server("a", no_args(), None, Some("A")).unwrap();
        manager.add_stdio_server("b", no_args(), None, Some("B")).unwrap();
        manager.add_stdio_server("c", no_args(), Some("p"), Some("A")).unwrap();

        assert_eq!(manager.get_server_names(), vec!["A", "B"]);
        assert_eq!(manager.get_config("A").unwrap().command(), Some("c"));
        assert_eq!(manager.get_server_by_name("A").unwrap().tool_prefix(), Some("p"));
    }

    #[test]
    fn test_remove_then_re_add_moves_to_end() {
        let mut manager = manager();
        for name in ["A", "B", "C"] {
            manager.add_stdio_server("python", no_args(), None, Some(name)).unwrap();
        }

        assert!(manager.remove_server("B"));
        manager.add_stdio_server("python", no_args(), None, Some("B")).unwrap();

        assert_eq!(manager.get_server_names(), vec!["A", "C", "B"]);
        let handles: Vec<_> = manager.get_servers().iter().map(|h| h.name().to_string()).collect();
        assert_eq!(handles, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_remove_unknown_is_false() {
        let mut manager = manager();
        assert!(!manager.remove_server("nope"));
        assert!(manager.get_server_info("nope").is_none());
        assert!(manager.get_server_by_name("nope").is_none());
    }

    #[test]
    fn test_remove_twice() {
        let mut manager = manager();
        manager.add_stdio_server("python", no_args(), None, Some("A")).unwrap();
        assert_eq!(manager.len(), 1);

        assert!(manager.remove_server("A"));
        assert_eq!(manager.len(), 0);
        assert!(!manager.remove_server("A"));
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_same_default_name_registers_once() {
        let mut manager = manager();
        let first = manager
            .add_stdio_server("python", ["-m", "old_server"], None, None)
            .unwrap();
        let second = manager
            .add_stdio_server("python", ["-m", "new_server"], None, None)
            .unwrap();

        assert_eq!(first, "stdio_python");
        assert_eq!(second, "stdio_python");
        assert_eq!(manager.get_server_names(), vec!["stdio_python"]);
        assert_eq!(manager.get_config("stdio_python").unwrap().args(), ["-m", "new_server"]);
    }

    #[test]
    fn test_failed_add_leaves_registry_unchanged() {
        let mut manager = manager();
        manager.add_stdio_server("python", no_args(), None, Some("A")).unwrap();
        manager.add_sse_server("http://localhost:3001/sse", None, Some("B")).unwrap();
        let before = manager.get_server_names();

        assert!(manager.add_sse_server("not a url", None, Some("A")).is_err());
        assert!(manager.add_http_server("", None, Some("C")).is_err());
        assert!(manager.add_stdio_server("  ", no_args(), None, Some("B")).is_err());

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get_server_names(), before);
        assert_eq!(manager.get_config("A").unwrap().command(), Some("python"));
        assert_eq!(manager.factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_then_enumerate_is_empty() {
        let mut manager = manager();
        manager.add_stdio_server("python", no_args(), None, None).unwrap();
        manager.add_sse_server("http://localhost:3001/sse", None, None).unwrap();

        manager.clear_all_servers();
        assert!(manager.get_servers().is_empty());
        assert!(manager.get_server_names().is_empty());
        assert!(manager.get_all_server_info().is_empty());
        assert!(manager.get_available_tools().is_empty());
    }

    #[test]
    fn test_snapshot_survives_removal() {
        let mut manager = manager();
        manager.add_stdio_server("python", no_args(), None, Some("kept")).unwrap();

        let snapshot = manager.get_servers();
        manager.remove_server("kept");

        assert!(manager.is_empty());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name(), "kept");
    }

    #[test]
    fn test_one_handle_per_registration() {
        let mut manager = manager();
        manager.add_stdio_server("python", no_args(), None, Some("A")).unwrap();
        manager.add_stdio_server("python", no_args(), None, Some("A")).unwrap();
        assert_eq!(manager.factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(manager.len(), 1);

        let first = manager.get_server_by_name("A").unwrap();
        let second = manager.get_server_by_name("A").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_available_tools_without_prefix() {
        let mut manager = manager();
        manager.add_stdio_server("python", no_args(), None, None).unwrap();
        manager.add_stdio_server("node", no_args(), Some("js"), None).unwrap();
        assert_eq!(manager.get_available_tools(), vec!["example_tool", "js_example_tool"]);
    }

    #[test]
    fn test_options_are_kept() {
        let mut manager = manager();
        let options = ServerOptions {
            timeout: Duration::from_secs(3),
            allow_sampling: false,
        };
        manager
            .add_sse_server_with("https://example.com/sse", None, Some("slow"), options)
            .unwrap();

        let config = manager.get_config("slow").unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert!(!config.allow_sampling());
    }

    #[test]
    fn test_from_settings_skips_optional_and_fails_required() {
        let good = McpServerSettings::stdio("python", vec!["-m".into(), "srv".into()]);
        let mut bad = McpServerSettings::stdio("", vec![]);
        bad.name = Some("broken".into());

        let manager = McpManager::from_settings(&[good.clone(), bad.clone()]).unwrap();
        assert_eq!(manager.get_server_names(), vec!["stdio_python"]);

        bad.required = true;
        let err = McpManager::from_settings(&[good.clone(), bad]).unwrap_err();
        assert!(matches!(err, McpError::InvalidConfiguration { .. }));

        let manager = McpManager::from_settings_with_factory(&[good], CountingFactory::default()).unwrap();
        assert_eq!(manager.factory.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_toolset_snapshot_covers_all_servers() {
        let mut manager = manager();
        manager.add_stdio_server("python", no_args(), None, Some("one")).unwrap();
        manager.add_stdio_server("python", no_args(), None, Some("two")).unwrap();
        assert_eq!(manager.factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(manager.toolset().sources().len(), 2);
    }
}
