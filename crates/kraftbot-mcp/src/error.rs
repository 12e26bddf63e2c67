//! MCP-specific error types.

use std::time::Duration;

use thiserror::Error;

use crate::config::TransportKind;

/// Errors raised by a transport while moving messages to and from a server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the server process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// The HTTP request itself failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// The SSE stream ended or misbehaved before the endpoint was announced.
    #[error("SSE handshake failed: {0}")]
    Handshake(String),

    /// No message is waiting and the transport cannot produce one.
    #[error("no pending message from server")]
    NoPendingMessage,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server descriptor is missing a field its transport needs.
    #[error("invalid {transport} server configuration: {message}")]
    InvalidConfiguration {
        transport: TransportKind,
        message: String,
    },

    /// A settings entry names a transport this client does not speak.
    #[error("unknown MCP transport '{0}' (expected stdio, sse or http)")]
    UnknownTransport(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level error (malformed messages, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool not found in any registered source.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Server initialization failed.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// Server returned an error response.
    #[error("server error (code {code}): {message}")]
    ServerError { code: i32, message: String },

    /// A sampling request from the server could not be served.
    #[error("sampling failed: {0}")]
    Sampling(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl McpError {
    /// Create an invalid configuration error.
    pub fn invalid_config(transport: TransportKind, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            transport,
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an initialization failed error.
    pub fn init_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a server error from JSON-RPC error.
    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }
}

impl From<McpError> for kraftbot_core::Error {
    fn from(e: McpError) -> Self {
        kraftbot_core::Error::Mcp(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_names_transport() {
        let err = McpError::invalid_config(TransportKind::Sse, "'url' is required");
        assert_eq!(
            err.to_string(),
            "invalid sse server configuration: 'url' is required"
        );
    }

    #[test]
    fn test_unknown_transport_names_no_kind() {
        let err = McpError::UnknownTransport("websocket".into());
        assert_eq!(
            err.to_string(),
            "unknown MCP transport 'websocket' (expected stdio, sse or http)"
        );
    }

    #[test]
    fn test_transport_error_wraps() {
        let err: McpError = TransportError::ConnectionClosed.into();
        assert_eq!(err.to_string(), "transport error: connection closed");
    }

    #[test]
    fn test_server_error_display() {
        let err = McpError::server_error(-32601, "Method not found");
        assert_eq!(err.to_string(), "server error (code -32601): Method not found");
    }

    #[test]
    fn test_mcp_error_to_core_error() {
        let core_err: kraftbot_core::Error = McpError::Timeout(Duration::from_secs(30)).into();
        assert!(matches!(core_err, kraftbot_core::Error::Mcp(ref m) if m.contains("after 30s")));
    }

    #[test]
    fn test_sub_second_timeout_keeps_its_unit() {
        let err = McpError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "request timed out after 250ms");
    }
}
