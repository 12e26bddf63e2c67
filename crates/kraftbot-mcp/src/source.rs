//! Tool sources: the agent-facing handles of registered servers.
//!
//! A handle is created from a descriptor without touching the network or
//! spawning anything. The first `list_tools` or `call_tool` opens the
//! transport and performs the MCP handshake; later calls reuse the session
//! until it fails or is closed, after which the next call reconnects.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{Endpoint, McpServerConfig, TransportKind};
use crate::connection::McpConnection;
use crate::error::{McpError, TransportError};
use crate::protocol::{CallToolResult, McpToolDefinition};
use crate::remote::{HttpTransport, SseTransport};
use crate::sampling::SamplingHandler;
use crate::transport::{StdioTransport, Transport};

/// A provider of tools the agent can call.
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Registry name of the server behind this source.
    fn name(&self) -> &str;

    fn transport(&self) -> TransportKind;

    fn tool_prefix(&self) -> Option<&str>;

    /// The name the agent sees for `tool`: `"{prefix}_{tool}"` when a prefix is set.
    fn prefixed_name(&self, tool: &str) -> String {
        match self.tool_prefix() {
            Some(prefix) => format!("{}_{}", prefix, tool),
            None => tool.to_string(),
        }
    }

    /// Tools offered by the server, under their unprefixed names.
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError>;

    /// Call a tool by its unprefixed name.
    async fn call_tool(&self, tool: &str, arguments: Option<Value>) -> Result<CallToolResult, McpError>;

    /// Drop the live session, if any.
    async fn close(&self) -> Result<(), McpError>;
}

/// Builds the handle stored for each registered descriptor.
pub trait HandleFactory: Send + Sync {
    fn create(&self, config: &McpServerConfig) -> Arc<dyn ToolSource>;
}

/// Builds the real, lazily connecting handles.
#[derive(Clone, Default)]
pub struct DefaultHandleFactory {
    client: reqwest::Client,
    sampler: Option<Arc<dyn SamplingHandler>>,
}

impl DefaultHandleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve sampling requests from servers whose descriptor allows it.
    pub fn with_sampler(mut self, sampler: Arc<dyn SamplingHandler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    fn session(&self, config: &McpServerConfig) -> LazySession {
        LazySession {
            connection: Mutex::new(None),
            sampler: self.sampler.clone().filter(|_| config.allow_sampling()),
        }
    }
}

impl std::fmt::Debug for DefaultHandleFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultHandleFactory")
            .field("sampler", &self.sampler.is_some())
            .finish()
    }
}

impl HandleFactory for DefaultHandleFactory {
    fn create(&self, config: &McpServerConfig) -> Arc<dyn ToolSource> {
        match config.endpoint() {
            Endpoint::Stdio { command, args } => Arc::new(StdioToolSource {
                config: config.clone(),
                command: command.clone(),
                args: args.clone(),
                session: self.session(config),
            }),
            Endpoint::Sse { url } => Arc::new(SseToolSource {
                config: config.clone(),
                url: url.clone(),
                client: self.client.clone(),
                session: self.session(config),
            }),
            Endpoint::Http { url } => Arc::new(HttpToolSource {
                config: config.clone(),
                url: url.clone(),
                client: self.client.clone(),
                session: self.session(config),
            }),
        }
    }
}

/// A session opened on first use.
#[derive(Default)]
struct LazySession {
    connection: Mutex<Option<Arc<McpConnection>>>,
    /// Set only when the descriptor allows sampling.
    sampler: Option<Arc<dyn SamplingHandler>>,
}

impl LazySession {
    /// The live connection, opening one with `open` if there is none.
    ///
    /// `open` is only awaited when a new connection is needed.
    async fn get<F>(&self, config: &McpServerConfig, open: F) -> Result<Arc<McpConnection>, McpError>
    where
        F: Future<Output = Result<Box<dyn Transport>, TransportError>> + Send,
    {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if connection.is_ready().await {
                return Ok(Arc::clone(connection));
            }
            debug!(server = %config.name(), "Dropping stale MCP session");
        }
        *slot = None;

        info!(server = %config.name(), transport = %config.transport(), "Connecting to MCP server");
        let transport = tokio::time::timeout(config.timeout(), open)
            .await
            .map_err(|_| McpError::Timeout(config.timeout()))??;

        let mut connection = McpConnection::new(config.name(), transport, config.timeout());
        if let Some(sampler) = &self.sampler {
            connection = connection.with_sampler(Arc::clone(sampler));
        }
        let connection = Arc::new(connection);
        connection.initialize().await?;

        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    async fn close(&self) -> Result<(), McpError> {
        let connection = self.connection.lock().await.take();
        match connection {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}

/// A server launched as a child process.
pub struct StdioToolSource {
    config: McpServerConfig,
    command: String,
    args: Vec<String>,
    session: LazySession,
}

impl StdioToolSource {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = StdioTransport::spawn(&self.command, &self.args).await?;
        Ok(Box::new(transport))
    }
}

#[async_trait]
impl ToolSource for StdioToolSource {
    fn name(&self) -> &str {
        self.config.name()
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn tool_prefix(&self) -> Option<&str> {
        self.config.tool_prefix()
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.session.get(&self.config, self.open()).await?.list_tools().await
    }

    async fn call_tool(&self, tool: &str, arguments: Option<Value>) -> Result<CallToolResult, McpError> {
        self.session
            .get(&self.config, self.open())
            .await?
            .call_tool(tool, arguments)
            .await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.session.close().await
    }
}

/// A server reached over the legacy SSE transport.
pub struct SseToolSource {
    config: McpServerConfig,
    url: String,
    client: reqwest::Client,
    session: LazySession,
}

impl SseToolSource {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = SseTransport::connect(self.client.clone(), &self.url).await?;
        Ok(Box::new(transport))
    }
}

#[async_trait]
impl ToolSource for SseToolSource {
    fn name(&self) -> &str {
        self.config.name()
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn tool_prefix(&self) -> Option<&str> {
        self.config.tool_prefix()
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.session.get(&self.config, self.open()).await?.list_tools().await
    }

    async fn call_tool(&self, tool: &str, arguments: Option<Value>) -> Result<CallToolResult, McpError> {
        self.session
            .get(&self.config, self.open())
            .await?
            .call_tool(tool, arguments)
            .await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.session.close().await
    }
}

/// A server reached over streamable HTTP.
pub struct HttpToolSource {
    config: McpServerConfig,
    url: String,
    client: reqwest::Client,
    session: LazySession,
}

impl HttpToolSource {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = HttpTransport::new(self.client.clone(), &self.url)?;
        Ok(Box::new(transport))
    }
}

#[async_trait]
impl ToolSource for HttpToolSource {
    fn name(&self) -> &str {
        self.config.name()
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Http
    }

    fn tool_prefix(&self) -> Option<&str> {
        self.config.tool_prefix()
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.session.get(&self.config, self.open()).await?.list_tools().await
    }

    async fn call_tool(&self, tool: &str, arguments: Option<Value>) -> Result<CallToolResult, McpError> {
        self.session
            .get(&self.config, self.open())
            .await?
            .call_tool(tool, arguments)
            .await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.session.close().await
    }
}
