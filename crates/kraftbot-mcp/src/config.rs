//! MCP server descriptors.
//!
//! A descriptor captures everything needed to reach one server: the
//! transport and its endpoint, the optional tool prefix, the per-request
//! timeout and whether the server may ask the client for sampling.
//! Descriptors are validated on construction, so a registered server is
//! always well-formed even though nothing has been contacted yet.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use kraftbot_core::McpServerSettings;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::McpError;

/// Per-request timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The wire mechanism used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON-RPC.
    Stdio,
    /// Legacy HTTP + Server-Sent Events transport.
    Sse,
    /// Streamable HTTP transport.
    Http,
}

impl TransportKind {
    /// The lowercase tag used in names, settings and info records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "http" | "streamable-http" | "streamable_http" => Ok(Self::Http),
            _ => Err(McpError::UnknownTransport(s.trim().to_string())),
        }
    }
}

/// Where a server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A local command launched as a child process.
    Stdio { command: String, args: Vec<String> },
    /// An SSE endpoint URL.
    Sse { url: String },
    /// A streamable HTTP endpoint URL.
    Http { url: String },
}

impl Endpoint {
    /// The transport this endpoint uses.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Sse { .. } => TransportKind::Sse,
            Self::Http { .. } => TransportKind::Http,
        }
    }
}

/// Per-server knobs shared by every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Whether the server may request LLM sampling from the client.
    pub allow_sampling: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            allow_sampling: true,
        }
    }
}

/// A validated description of one MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServerConfig {
    name: String,
    endpoint: Endpoint,
    tool_prefix: Option<String>,
    options: ServerOptions,
}

impl McpServerConfig {
    /// Describe a stdio server. Fails when `command` is empty.
    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Result<Self, McpError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(McpError::invalid_config(TransportKind::Stdio, "'command' is required"));
        }

        Ok(Self::with_endpoint(
            name,
            Endpoint::Stdio {
                command,
                args: args.into_iter().map(Into::into).collect(),
            },
        ))
    }

    /// Describe an SSE server. Fails unless `url` is an absolute http(s) URL.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Result<Self, McpError> {
        let url = url.into();
        validate_url(TransportKind::Sse, &url)?;
        Ok(Self::with_endpoint(name, Endpoint::Sse { url }))
    }

    /// Describe a streamable HTTP server. Fails unless `url` is an absolute http(s) URL.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Result<Self, McpError> {
        let url = url.into();
        validate_url(TransportKind::Http, &url)?;
        Ok(Self::with_endpoint(name, Endpoint::Http { url }))
    }

    /// Build a descriptor from a `[[mcp.servers]]` settings entry.
    ///
    /// A missing name is derived from the command or URL.
    pub fn from_settings(settings: &McpServerSettings) -> Result<Self, McpError> {
        let kind: TransportKind = settings.transport.parse()?;

        let config = match kind {
            TransportKind::Stdio => {
                let command = settings.command.clone().unwrap_or_default();
                let name = explicit_name(settings.name.as_deref())
                    .unwrap_or_else(|| default_stdio_name(&command));
                Self::stdio(name, command, settings.args.iter().cloned())?
            }
            TransportKind::Sse | TransportKind::Http => {
                let url = settings.url.clone().unwrap_or_default();
                let name = explicit_name(settings.name.as_deref())
                    .unwrap_or_else(|| default_remote_name(kind, &url));
                if kind == TransportKind::Sse {
                    Self::sse(name, url)?
                } else {
                    Self::http(name, url)?
                }
            }
        };

        let mut options = ServerOptions::default();
        if let Some(secs) = settings.timeout {
            options.timeout = Duration::from_secs(secs);
        }
        if let Some(allow) = settings.allow_sampling {
            options.allow_sampling = allow;
        }

        Ok(config
            .with_tool_prefix(settings.tool_prefix.clone())
            .with_options(options))
    }

    fn with_endpoint(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
            tool_prefix: None,
            options: ServerOptions::default(),
        }
    }

    /// Set the tool prefix. An empty prefix counts as none.
    pub fn with_tool_prefix(mut self, prefix: Option<impl Into<String>>) -> Self {
        self.tool_prefix = prefix.map(Into::into).filter(|p: &String| !p.is_empty());
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Allow or forbid sampling requests from the server.
    pub fn with_allow_sampling(mut self, allow: bool) -> Self {
        self.options.allow_sampling = allow;
        self
    }

    /// Replace all per-server options at once.
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn transport(&self) -> TransportKind {
        self.endpoint.kind()
    }

    pub fn tool_prefix(&self) -> Option<&str> {
        self.tool_prefix.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    pub fn allow_sampling(&self) -> bool {
        self.options.allow_sampling
    }

    pub fn options(&self) -> ServerOptions {
        self.options
    }

    /// The command of a stdio server.
    pub fn command(&self) -> Option<&str> {
        match &self.endpoint {
            Endpoint::Stdio { command, .. } => Some(command),
            _ => None,
        }
    }

    /// The arguments of a stdio server; empty for remote servers.
    pub fn args(&self) -> &[String] {
        match &self.endpoint {
            Endpoint::Stdio { args, .. } => args,
            _ => &[],
        }
    }

    /// The URL of an SSE or HTTP server.
    pub fn url(&self) -> Option<&str> {
        match &self.endpoint {
            Endpoint::Sse { url } | Endpoint::Http { url } => Some(url),
            Endpoint::Stdio { .. } => None,
        }
    }

    /// A status record for display.
    ///
    /// Status is reported as "connected" for every registered server and
    /// the tool count is always zero; neither reflects a live session.
    pub fn info(&self) -> McpServerInfo {
        McpServerInfo {
            name: self.name.clone(),
            transport_type: self.transport().as_str().to_string(),
            tool_prefix: self.tool_prefix.clone(),
            status: "connected".to_string(),
            tools_count: 0,
            last_used: None,
            error_message: None,
        }
    }
}

/// Display record for a registered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct McpServerInfo {
    pub name: String,
    pub transport_type: String,
    pub tool_prefix: Option<String>,
    pub status: String,
    pub tools_count: usize,
    pub last_used: Option<String>,
    pub error_message: Option<String>,
}

/// Default name for a stdio server: `stdio_` plus the command with `/` replaced by `_`.
pub fn default_stdio_name(command: &str) -> String {
    format!("stdio_{}", command.replace('/', "_"))
}

/// Default name for a remote server: the transport tag plus the URL after
/// its last `//`, with `/` and `:` replaced by `_`.
pub fn default_remote_name(kind: TransportKind, url: &str) -> String {
    let rest = url.rsplit("//").next().unwrap_or(url);
    format!("{}_{}", kind.as_str(), rest.replace(['/', ':'], "_"))
}

/// An explicit name, treating the empty string as absent.
pub(crate) fn explicit_name(name: Option<&str>) -> Option<String> {
    name.filter(|n| !n.is_empty()).map(str::to_string)
}

fn validate_url(kind: TransportKind, url: &str) -> Result<(), McpError> {
    if url.trim().is_empty() {
        return Err(McpError::invalid_config(kind, "'url' is required"));
    }

    let parsed = Url::parse(url)
        .map_err(|e| McpError::invalid_config(kind, format!("'url' is not a valid URL ({}): {}", e, url)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(McpError::invalid_config(
            kind,
            format!("'url' must use http or https, got '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(default_stdio_name("python"), "stdio_python");
        assert_eq!(default_stdio_name("/usr/bin/server"), "stdio__usr_bin_server");
        assert_eq!(
            default_remote_name(TransportKind::Sse, "http://localhost:3001/sse"),
            "sse_localhost_3001_sse"
        );
        assert_eq!(
            default_remote_name(TransportKind::Http, "https://tools.example.com/mcp"),
            "http_tools.example.com_mcp"
        );
    }

    #[test]
    fn test_stdio_requires_command() {
        let err = McpServerConfig::stdio("x", "", Vec::<String>::new()).unwrap_err();
        match err {
            McpError::InvalidConfiguration { transport, message } => {
                assert_eq!(transport, TransportKind::Stdio);
                assert!(message.contains("command"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_remote_requires_url() {
        let err = McpServerConfig::sse("x", "").unwrap_err();
        assert!(matches!(
            err,
            McpError::InvalidConfiguration { transport: TransportKind::Sse, ref message } if message.contains("url")
        ));

        let err = McpServerConfig::http("x", "not a url").unwrap_err();
        assert!(matches!(
            err,
            McpError::InvalidConfiguration { transport: TransportKind::Http, .. }
        ));

        let err = McpServerConfig::http("x", "ftp://example.com/mcp").unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_defaults_and_builders() {
        let config = McpServerConfig::stdio("fs", "npx", ["-y", "server-filesystem"]).unwrap();
        assert_eq!(config.transport(), TransportKind::Stdio);
        assert_eq!(config.command(), Some("npx"));
        assert_eq!(config.args(), ["-y", "server-filesystem"]);
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert!(config.allow_sampling());
        assert_eq!(config.tool_prefix(), None);

        let config = config
            .with_tool_prefix(Some("fs"))
            .with_timeout(Duration::from_secs(5))
            .with_allow_sampling(false);
        assert_eq!(config.tool_prefix(), Some("fs"));
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(!config.allow_sampling());

        let config = config.with_tool_prefix(Some(""));
        assert_eq!(config.tool_prefix(), None);
    }

    #[test]
    fn test_info_record() {
        let config = McpServerConfig::sse("weather", "http://localhost:3001/sse")
            .unwrap()
            .with_tool_prefix(Some("wx"));
        let info = config.info();
        assert_eq!(info.name, "weather");
        assert_eq!(info.transport_type, "sse");
        assert_eq!(info.tool_prefix.as_deref(), Some("wx"));
        assert_eq!(info.status, "connected");
        assert_eq!(info.tools_count, 0);
        assert!(info.last_used.is_none());
        assert!(info.error_message.is_none());
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("stdio".parse::<TransportKind>().unwrap(), TransportKind::Stdio);
        assert_eq!("SSE".parse::<TransportKind>().unwrap(), TransportKind::Sse);
        assert_eq!("streamable-http".parse::<TransportKind>().unwrap(), TransportKind::Http);
        assert!("websocket".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_from_settings() {
        let settings = McpServerSettings::stdio("python", vec!["-m".into(), "sleeper_mcp_server".into()]);
        let config = McpServerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.name(), "stdio_python");
        assert_eq!(config.args(), ["-m", "sleeper_mcp_server"]);

        let mut settings = McpServerSettings::stdio("unused", vec![]);
        settings.transport = "http".into();
        settings.url = Some("http://localhost:8000/mcp".into());
        settings.tool_prefix = Some("remote".into());
        settings.timeout = Some(10);
        settings.allow_sampling = Some(false);
        let config = McpServerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.name(), "http_localhost_8000_mcp");
        assert_eq!(config.transport(), TransportKind::Http);
        assert_eq!(config.tool_prefix(), Some("remote"));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert!(!config.allow_sampling());
    }

    #[test]
    fn test_from_settings_rejects_missing_url() {
        let mut settings = McpServerSettings::stdio("unused", vec![]);
        settings.transport = "sse".into();
        let err = McpServerConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(
            err,
            McpError::InvalidConfiguration { transport: TransportKind::Sse, .. }
        ));
    }

    #[test]
    fn test_from_settings_rejects_unknown_transport() {
        let mut settings = McpServerSettings::stdio("node", vec![]);
        settings.transport = " WebSocket ".into();
        let err = McpServerConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, McpError::UnknownTransport(ref name) if name == "WebSocket"));
        assert!(!err.to_string().contains("stdio server"));
    }
}
