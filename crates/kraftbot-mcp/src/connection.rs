//! A live JSON-RPC session with one MCP server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, CreateMessageParams, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcErrorReply, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResultReply, ListToolsParams, ListToolsResult, McpToolDefinition, ServerInfo,
    CREATE_MESSAGE_METHOD,
};
use crate::sampling::SamplingHandler;
use crate::transport::Transport;

/// Connection state for an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, handshake not done yet.
    Connected,
    /// Handshake done; requests may flow.
    Ready,
    /// Closed, or the transport failed.
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Ready => write!(f, "ready"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// One initialized session over any [`Transport`].
///
/// Requests are serialized through the transport lock, so a session
/// carries one request at a time.
pub struct McpConnection {
    name: String,
    transport: Mutex<Box<dyn Transport>>,
    state: RwLock<ConnectionState>,
    server_info: RwLock<Option<ServerInfo>>,
    request_counter: AtomicU64,
    timeout: Duration,
    sampler: Option<Arc<dyn SamplingHandler>>,
}

impl McpConnection {
    /// Wrap an open transport. Call [`initialize`](Self::initialize) before use.
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            transport: Mutex::new(transport),
            state: RwLock::new(ConnectionState::Connected),
            server_info: RwLock::new(None),
            request_counter: AtomicU64::new(1),
            timeout,
            sampler: None,
        }
    }

    /// Serve `sampling/createMessage` with `sampler` and advertise the
    /// capability during the handshake.
    pub fn with_sampler(mut self, sampler: Arc<dyn SamplingHandler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Whether the handshake offers sampling to the server.
    pub fn offers_sampling(&self) -> bool {
        self.sampler.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_ready(&self) -> bool {
        *self.state.read().await == ConnectionState::Ready
    }

    /// Server identity reported during the handshake.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().await.clone()
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn ensure_state(&self, expected: ConnectionState) -> Result<(), McpError> {
        let state = *self.state.read().await;
        if state == expected {
            Ok(())
        } else {
            Err(McpError::protocol(format!(
                "connection to '{}' is {}, expected {}",
                self.name, state, expected
            )))
        }
    }

    /// Send a request and wait for its response, bounded by the per-request timeout.
    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, McpError>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let request_json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let mut transport = self.transport.lock().await;
        let exchanged = tokio::time::timeout(
            self.timeout,
            exchange(&mut **transport, id, &request_json, self.sampler.as_deref()),
        )
        .await;

        let value = match exchanged {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                if matches!(e, McpError::Transport(_)) {
                    *self.state.write().await = ConnectionState::Disconnected;
                }
                return Err(e);
            }
            Err(_) => {
                warn!(server = %self.name, method = method, "MCP request timed out");
                return Err(McpError::Timeout(self.timeout));
            }
        };

        let response: JsonRpcResponse<R> = serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = response.error {
            return Err(McpError::server_error(error.code, error.message));
        }

        response
            .result
            .ok_or_else(|| McpError::protocol("Response missing result"))
    }

    /// Send a notification (no response expected).
    async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<(), McpError>
    where
        P: serde::Serialize,
    {
        let notification_json = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        let mut transport = self.transport.lock().await;
        transport.send(&notification_json).await?;
        Ok(())
    }

    /// Perform the `initialize` handshake.
    pub async fn initialize(&self) -> Result<(), McpError> {
        self.ensure_state(ConnectionState::Connected).await?;
        debug!(server = %self.name, sampling = self.offers_sampling(), "Initializing MCP connection");

        let result: InitializeResult = self
            .request("initialize", Some(InitializeParams::new(self.offers_sampling())))
            .await
            .map_err(|e| match e {
                McpError::Timeout(_) | McpError::Transport(_) => e,
                other => McpError::init_failed(other.to_string()),
            })?;

        self.notify::<()>("notifications/initialized", None).await?;

        info!(
            server = %self.name,
            server_name = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP connection initialized"
        );

        *self.server_info.write().await = Some(result.server_info);
        *self.state.write().await = ConnectionState::Ready;
        Ok(())
    }

    /// List every tool, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_state(ConnectionState::Ready).await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.take().map(|c| ListToolsParams { cursor: Some(c) });
            let page: ListToolsResult = self.request("tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(server = %self.name, tool_count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// Invoke one tool.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult, McpError> {
        self.ensure_state(ConnectionState::Ready).await?;
        debug!(server = %self.name, tool = name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            warn!(server = %self.name, tool = name, "Tool returned error");
        }
        Ok(result)
    }

    /// Close the transport. Safe to call more than once.
    pub async fn close(&self) -> Result<(), McpError> {
        if *self.state.read().await == ConnectionState::Disconnected {
            return Ok(());
        }
        *self.state.write().await = ConnectionState::Disconnected;

        let mut transport = self.transport.lock().await;
        transport.close().await?;
        info!(server = %self.name, "MCP connection closed");
        Ok(())
    }
}

/// Write one request and read until its response arrives.
///
/// Notifications are skipped. Requests from the server are answered in
/// place: `ping`, and `sampling/createMessage` when a sampler is attached.
/// Anything else gets "method not found".
async fn exchange(
    transport: &mut dyn Transport,
    id: u64,
    request_json: &str,
    sampler: Option<&dyn SamplingHandler>,
) -> Result<Value, McpError> {
    transport.send(request_json).await?;

    loop {
        let message = transport.receive().await?;
        let value: Value = match serde_json::from_str(&message) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Skipping non-JSON line from MCP server");
                continue;
            }
        };

        let method = value.get("method").and_then(Value::as_str);
        let message_id = value.get("id").filter(|v| !v.is_null());

        match (method, message_id) {
            (Some(method), Some(request_id)) => {
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                let reply = answer_server_request(method, request_id.clone(), params, sampler).await?;
                transport.send(&reply).await?;
            }
            (Some(method), None) => debug!(method = method, "Ignoring server notification"),
            (None, Some(message_id)) if message_id.as_u64() == Some(id) => return Ok(value),
            (None, _) => debug!(expected = id, "Ignoring response for another request"),
        }
    }
}

/// Build the reply to one server-initiated request.
async fn answer_server_request(
    method: &str,
    id: Value,
    params: Value,
    sampler: Option<&dyn SamplingHandler>,
) -> Result<String, McpError> {
    let reply = match (method, sampler) {
        ("ping", _) => serde_json::to_string(&JsonRpcResultReply::new(id, serde_json::json!({})))?,
        (CREATE_MESSAGE_METHOD, Some(sampler)) => {
            debug!("Serving sampling request from MCP server");
            match serde_json::from_value::<CreateMessageParams>(params) {
                Ok(params) => match sampler.create_message(params).await {
                    Ok(result) => serde_json::to_string(&JsonRpcResultReply::new(id, result))?,
                    Err(e) => {
                        warn!(error = %e, "Sampling request failed");
                        serde_json::to_string(&JsonRpcErrorReply::new(id, JsonRpcError::INTERNAL_ERROR, e.to_string()))?
                    }
                },
                Err(e) => serde_json::to_string(&JsonRpcErrorReply::new(
                    id,
                    JsonRpcError::INVALID_PARAMS,
                    format!("Invalid sampling request: {}", e),
                ))?,
            }
        }
        _ => {
            debug!(method = method, "Rejecting server-initiated request");
            serde_json::to_string(&JsonRpcErrorReply::method_not_found(id, method))?
        }
    };
    Ok(reply)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::{CreateMessageResult, SamplingContent};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    type Responder = dyn Fn(&Value) -> Vec<Value> + Send + Sync;

    /// In-memory server: every request is answered by `respond`.
    pub(crate) struct ScriptedTransport {
        respond: Box<Responder>,
        inbox: VecDeque<String>,
        pub(crate) sent: Arc<StdMutex<Vec<Value>>>,
        connected: bool,
    }

    impl ScriptedTransport {
        pub(crate) fn new(respond: impl Fn(&Value) -> Vec<Value> + Send + Sync + 'static) -> Self {
            Self {
                respond: Box::new(respond),
                inbox: VecDeque::new(),
                sent: Arc::new(StdMutex::new(Vec::new())),
                connected: true,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, message: &str) -> Result<(), TransportError> {
            let value: Value = serde_json::from_str(message).unwrap();
            self.sent.lock().unwrap().push(value.clone());
            for reply in (self.respond)(&value) {
                self.inbox.push_back(reply.to_string());
            }
            Ok(())
        }

        async fn receive(&mut self) -> Result<String, TransportError> {
            match self.inbox.pop_front() {
                Some(message) => Ok(message),
                None => futures::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    /// A well-behaved server exposing `echo` and `add`.
    pub(crate) fn tool_server(request: &Value) -> Vec<Value> {
        let id = request["id"].clone();
        match request["method"].as_str() {
            Some("initialize") => vec![json!({
                "jsonrpc": "2.0", "id": id,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "1.0"}
                }
            })],
            Some("tools/list") => vec![json!({
                "jsonrpc": "2.0", "id": id,
                "result": {"tools": [
                    {"name": "echo", "description": "Echo text", "inputSchema": {"type": "object"}},
                    {"name": "add", "inputSchema": {"type": "object"}}
                ]}
            })],
            Some("tools/call") => {
                let text = request["params"]["arguments"]["text"].as_str().unwrap_or("").to_string();
                vec![json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": {"content": [{"type": "text", "text": text}]}
                })]
            }
            _ => vec![],
        }
    }

    async fn ready_connection(transport: ScriptedTransport) -> McpConnection {
        let connection = McpConnection::new("scripted", Box::new(transport), Duration::from_secs(5));
        connection.initialize().await.unwrap();
        connection
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Ready.to_string(), "ready");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let transport = ScriptedTransport::new(tool_server);
        let sent = Arc::clone(&transport.sent);
        let connection = ready_connection(transport).await;

        assert!(connection.is_ready().await);
        assert_eq!(connection.server_info().await.unwrap().name, "scripted");

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0]["method"], "initialize");
        assert_eq!(sent[1]["method"], "notifications/initialized");
        assert!(sent[1].get("id").is_none());
    }

    #[tokio::test]
    async fn test_list_and_call() {
        let connection = ready_connection(ScriptedTransport::new(tool_server)).await;

        let tools = connection.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "add"]);

        let result = connection
            .call_tool("echo", Some(json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result.text(), "hi");
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let transport = ScriptedTransport::new(|request| {
            let id = request["id"].clone();
            match (request["method"].as_str(), request["params"]["cursor"].as_str()) {
                (Some("tools/list"), None) => vec![json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": {"tools": [{"name": "first"}], "nextCursor": "2"}
                })],
                (Some("tools/list"), Some("2")) => vec![json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": {"tools": [{"name": "second"}]}
                })],
                _ => tool_server(request),
            }
        });
        let connection = ready_connection(transport).await;

        let tools = connection.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1].name, "second");
    }

    #[tokio::test]
    async fn test_skips_notifications_and_answers_server_requests() {
        let transport = ScriptedTransport::new(|request| {
            if request["method"] == "tools/call" {
                let id = request["id"].clone();
                vec![
                    json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {}}),
                    json!({"jsonrpc": "2.0", "id": "srv-1", "method": "sampling/createMessage", "params": {}}),
                    json!({"jsonrpc": "2.0", "id": id, "result": {"content": [{"type": "text", "text": "ok"}]}}),
                ]
            } else {
                tool_server(request)
            }
        });
        let sent = Arc::clone(&transport.sent);
        let connection = ready_connection(transport).await;

        let result = connection.call_tool("slow", None).await.unwrap();
        assert_eq!(result.text(), "ok");

        let sent = sent.lock().unwrap();
        let reply = sent.iter().find(|m| m["id"] == "srv-1").unwrap();
        assert_eq!(reply["error"]["code"], -32601);
    }

    struct CannedSampler {
        fail: bool,
    }

    #[async_trait]
    impl SamplingHandler for CannedSampler {
        async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, McpError> {
            if self.fail {
                return Err(McpError::Sampling("model unavailable".into()));
            }
            let SamplingContent::Text { text } = &params.messages[0].content else {
                return Err(McpError::Sampling("text only".into()));
            };
            Ok(CreateMessageResult {
                role: "assistant".into(),
                content: SamplingContent::text(format!("summary of {}", text)),
                model: "test/model".into(),
                stop_reason: Some("endTurn".into()),
            })
        }
    }

    /// A server whose `summarize` tool asks the client to sample before answering.
    fn sampling_server(request: &Value) -> Vec<Value> {
        match request["method"].as_str() {
            Some("tools/call") => vec![json!({
                "jsonrpc": "2.0", "id": "srv-7", "method": "sampling/createMessage",
                "params": {
                    "messages": [{"role": "user", "content": {"type": "text", "text": "week 5"}}],
                    "maxTokens": 50
                }
            })],
            None => {
                let text = match request["result"]["content"]["text"].as_str() {
                    Some(text) => text.to_string(),
                    None => format!("error {}", request["error"]["code"]),
                };
                vec![json!({
                    "jsonrpc": "2.0", "id": 2,
                    "result": {"content": [{"type": "text", "text": text}]}
                })]
            }
            _ => tool_server(request),
        }
    }

    #[tokio::test]
    async fn test_sampling_offered_and_served_with_sampler() {
        let transport = ScriptedTransport::new(sampling_server);
        let sent = Arc::clone(&transport.sent);
        let connection = McpConnection::new("sampling", Box::new(transport), Duration::from_secs(5))
            .with_sampler(Arc::new(CannedSampler { fail: false }));
        connection.initialize().await.unwrap();

        let result = connection.call_tool("summarize", None).await.unwrap();
        assert_eq!(result.text(), "summary of week 5");

        let sent = sent.lock().unwrap();
        assert!(sent[0]["params"]["capabilities"]["sampling"].is_object());
        let reply = sent.iter().find(|m| m["id"] == "srv-7").unwrap();
        assert_eq!(reply["result"]["model"], "test/model");
        assert_eq!(reply["result"]["role"], "assistant");
    }

    #[tokio::test]
    async fn test_sampling_not_offered_without_sampler() {
        let transport = ScriptedTransport::new(sampling_server);
        let sent = Arc::clone(&transport.sent);
        let connection = ready_connection(transport).await;
        assert!(!connection.offers_sampling());

        let result = connection.call_tool("summarize", None).await.unwrap();
        assert_eq!(result.text(), "error -32601");

        let sent = sent.lock().unwrap();
        assert!(sent[0]["params"]["capabilities"].get("sampling").is_none());
    }

    #[tokio::test]
    async fn test_sampling_failure_is_internal_error() {
        let connection = McpConnection::new(
            "sampling",
            Box::new(ScriptedTransport::new(sampling_server)),
            Duration::from_secs(5),
        )
        .with_sampler(Arc::new(CannedSampler { fail: true }));
        connection.initialize().await.unwrap();

        let result = connection.call_tool("summarize", None).await.unwrap();
        assert_eq!(result.text(), "error -32603");
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let transport = ScriptedTransport::new(|request| {
            if request["method"] == "tools/call" {
                let id = request["id"].clone();
                vec![
                    json!({"jsonrpc": "2.0", "id": 99, "method": "ping"}),
                    json!({"jsonrpc": "2.0", "id": id, "result": {"content": []}}),
                ]
            } else {
                tool_server(request)
            }
        });
        let sent = Arc::clone(&transport.sent);
        let connection = ready_connection(transport).await;

        connection.call_tool("echo", None).await.unwrap();
        let sent = sent.lock().unwrap();
        let pong = sent.iter().find(|m| m["id"] == 99).unwrap();
        assert!(pong["result"].is_object());
        assert!(pong.get("error").is_none());
    }

    #[tokio::test]
    async fn test_server_error_response() {
        let transport = ScriptedTransport::new(|request| {
            if request["method"] == "tools/call" {
                vec![json!({
                    "jsonrpc": "2.0", "id": request["id"].clone(),
                    "error": {"code": -32602, "message": "Unknown tool"}
                })]
            } else {
                tool_server(request)
            }
        });
        let connection = ready_connection(transport).await;

        let err = connection.call_tool("missing", None).await.unwrap_err();
        assert!(matches!(err, McpError::ServerError { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let transport = ScriptedTransport::new(|request| {
            if request["method"] == "tools/call" {
                vec![]
            } else {
                tool_server(request)
            }
        });
        let connection = McpConnection::new("slow", Box::new(transport), Duration::from_millis(50));
        connection.initialize().await.unwrap();

        let err = connection.call_tool("never", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(err.to_string(), "request timed out after 50ms");
    }

    #[tokio::test]
    async fn test_requests_require_handshake() {
        let connection = McpConnection::new(
            "fresh",
            Box::new(ScriptedTransport::new(tool_server)),
            Duration::from_secs(1),
        );
        assert!(connection.list_tools().await.is_err());

        connection.initialize().await.unwrap();
        connection.close().await.unwrap();
        assert_eq!(connection.state().await, ConnectionState::Disconnected);
        assert!(connection.call_tool("echo", None).await.is_err());
    }
}
