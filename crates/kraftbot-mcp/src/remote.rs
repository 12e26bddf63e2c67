//! HTTP based transports: legacy SSE and streamable HTTP.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::TransportError;
use crate::sse::{SseEvent, SseParser};
use crate::transport::Transport;

/// Header carrying the streamable HTTP session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, TransportError>> + Send>>;

/// Decode a streaming response body into SSE events.
fn event_stream(response: Response) -> EventStream {
    let state = (response.bytes_stream(), SseParser::new(), VecDeque::new());

    Box::pin(stream::unfold(state, |(mut bytes, mut parser, mut pending)| async move {
        loop {
            if let Some(event) = pending.pop_front() {
                return Some((Ok(event), (bytes, parser, pending)));
            }

            match bytes.next().await {
                Some(Ok(chunk)) => pending.extend(parser.feed(&chunk)),
                Some(Err(e)) => {
                    return Some((Err(TransportError::Http(e.to_string())), (bytes, parser, pending)));
                }
                None => match parser.finish() {
                    Some(event) => pending.push_back(event),
                    None => return None,
                },
            }
        }
    }))
}

async fn ensure_success(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(TransportError::HttpStatus {
        status: status.as_u16(),
        message,
    })
}

fn parse_url(url: &str) -> Result<Url, TransportError> {
    Url::parse(url).map_err(|e| TransportError::Http(format!("invalid URL '{}': {}", url, e)))
}

/// Legacy SSE transport.
///
/// Server messages arrive on a long-lived GET stream. The first `endpoint`
/// event names the URL that client messages are POSTed to.
pub struct SseTransport {
    client: Client,
    endpoint: Url,
    events: EventStream,
    connected: bool,
}

impl SseTransport {
    /// Open the event stream and wait for the endpoint announcement.
    pub async fn connect(client: Client, url: &str) -> Result<Self, TransportError> {
        let base = parse_url(url)?;
        debug!(url = %base, "Opening MCP SSE stream");

        let response = client
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let mut events = event_stream(ensure_success(response).await?);

        let endpoint = loop {
            match events.next().await {
                Some(Ok(event)) if event.is_endpoint() => {
                    break base.join(event.data.trim()).map_err(|e| {
                        TransportError::Handshake(format!("bad endpoint '{}': {}", event.data, e))
                    })?;
                }
                Some(Ok(event)) => debug!(kind = event.kind(), "Skipping SSE event before endpoint"),
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(TransportError::Handshake(
                        "stream closed before the endpoint event".to_string(),
                    ))
                }
            }
        };

        debug!(endpoint = %endpoint, "MCP SSE endpoint announced");

        Ok(Self {
            client,
            endpoint,
            events,
            connected: true,
        })
    }

    /// The URL client messages are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        debug!(message = message, "Posting message to MCP SSE endpoint");
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        loop {
            match self.events.next().await {
                Some(Ok(event)) if event.is_message() => return Ok(event.data),
                Some(Ok(event)) => debug!(kind = event.kind(), "Ignoring SSE event"),
                Some(Err(e)) => {
                    self.connected = false;
                    return Err(e);
                }
                None => {
                    self.connected = false;
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.events = Box::pin(stream::empty());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Streamable HTTP transport.
///
/// Every client message is a POST. The reply is either a JSON body or an
/// SSE stream; whatever messages it holds are queued for [`receive`].
///
/// [`receive`]: Transport::receive
pub struct HttpTransport {
    client: Client,
    url: Url,
    session_id: Option<String>,
    inbox: VecDeque<String>,
    connected: bool,
}

impl HttpTransport {
    pub fn new(client: Client, url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            client,
            url: parse_url(url)?,
            session_id: None,
            inbox: VecDeque::new(),
            connected: true,
        })
    }

    /// Session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn queue_json(&mut self, body: &str) {
        let body = body.trim();
        if body.is_empty() {
            return;
        }

        // A batch reply carries several messages in one array.
        if body.starts_with('[') {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) {
                self.inbox.extend(items.iter().map(Value::to_string));
                return;
            }
        }
        self.inbox.push_back(body.to_string());
    }

    fn queue_events(&mut self, body: &str) {
        let mut parser = SseParser::new();
        let mut events = parser.feed_str(body);
        events.extend(parser.finish());

        self.inbox
            .extend(events.into_iter().filter(SseEvent::is_message).map(|e| e.data));
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        debug!(message = message, "Posting message to MCP HTTP endpoint");
        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(message.to_string());
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await?;
        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }

        let response = ensure_success(response).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = response.text().await?;

        if is_event_stream {
            self.queue_events(&body);
        } else {
            self.queue_json(&body);
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.inbox.pop_front().ok_or(TransportError::NoPendingMessage)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.inbox.clear();

        if let Some(session_id) = self.session_id.take() {
            let result = self
                .client
                .delete(self.url.clone())
                .header(SESSION_HEADER, &session_id)
                .send()
                .await;
            if let Err(e) = result {
                debug!(error = %e, "Failed to end MCP HTTP session");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new(Client::new(), "http://localhost:8000/mcp").unwrap()
    }

    fn assert_send<T: Send>() {}
    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_remote_transports_box_into_shared_connection() {
        // The SSE event stream is Send but not Sync.
        assert_send::<SseTransport>();
        assert_send::<HttpTransport>();
        assert_send_sync::<crate::connection::McpConnection>();

        let boxed: Box<dyn Transport> = Box::new(transport());
        let connection = crate::connection::McpConnection::new("remote", boxed, std::time::Duration::from_secs(1));
        assert_eq!(connection.name(), "remote");
    }

    #[tokio::test]
    async fn test_json_reply_is_queued() {
        let mut transport = transport();
        transport.queue_json("  {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n");

        let message = transport.receive().await.unwrap();
        assert_eq!(message, "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}");
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::NoPendingMessage)
        ));
    }

    #[tokio::test]
    async fn test_batch_reply_is_split() {
        let mut transport = transport();
        transport.queue_json(r#"[{"id":1,"result":{}},{"method":"notifications/progress"}]"#);

        let first: Value = serde_json::from_str(&transport.receive().await.unwrap()).unwrap();
        let second: Value = serde_json::from_str(&transport.receive().await.unwrap()).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(second["method"], "notifications/progress");
    }

    #[tokio::test]
    async fn test_event_stream_reply_keeps_messages_only() {
        let mut transport = transport();
        transport.queue_events("event: ping\ndata: x\n\nevent: message\ndata: {\"id\":3}\n\ndata: {\"id\":4}");

        assert_eq!(transport.receive().await.unwrap(), "{\"id\":3}");
        assert_eq!(transport.receive().await.unwrap(), "{\"id\":4}");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(HttpTransport::new(Client::new(), "not a url").is_err());
    }

    #[tokio::test]
    async fn test_sse_connect_refused() {
        // Nothing listens on port 9 locally; the handshake must fail cleanly.
        let result = SseTransport::connect(Client::new(), "http://127.0.0.1:9/sse").await;
        assert!(result.is_err());
    }
}
