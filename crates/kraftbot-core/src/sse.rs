//! Server-Sent Events framing, shared by the streaming chat client and the
//! remote MCP transports.
//!
//! Chunks from the network can split a line anywhere, so bytes are buffered
//! until a full line is available. An event is emitted on the blank line
//! that terminates it.

use std::fmt;

/// Event name the legacy SSE transport uses to announce its POST endpoint.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// Event name carrying a JSON-RPC message.
pub const MESSAGE_EVENT: &str = "message";

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with newlines.
    pub data: String,
    /// Value of the `id:` field, if any.
    pub id: Option<String>,
}

impl SseEvent {
    /// The event type, defaulting to `message` as browsers do.
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or(MESSAGE_EVENT)
    }

    pub fn is_endpoint(&self) -> bool {
        self.kind() == ENDPOINT_EVENT
    }

    pub fn is_message(&self) -> bool {
        self.kind() == MESSAGE_EVENT
    }

    /// The `[DONE]` sentinel that ends an OpenAI-style completion stream.
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }
}

/// Incremental SSE decoder.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and collect every event they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        self.drain_lines()
    }

    /// Feed text and collect every event it completes.
    pub fn feed_str(&mut self, text: &str) -> Vec<SseEvent> {
        self.buffer.push_str(text);
        self.drain_lines()
    }

    /// Flush a trailing event whose terminating blank line never arrived.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.apply_line(line.trim_end_matches('\r'));
        }
        self.dispatch()
    }

    fn drain_lines(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                events.extend(self.dispatch());
            } else {
                self.apply_line(line);
            }
        }

        events
    }

    fn apply_line(&mut self, line: &str) {
        // Comment lines (often keep-alives) start with a colon.
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            id,
        })
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("buffer_len", &self.buffer.len())
            .field("pending_data_lines", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: endpoint\ndata: /messages?session_id=abc\n\n");

        assert_eq!(events.len(), 1);
        assert!(events[0].is_endpoint());
        assert_eq!(events[0].data, "/messages?session_id=abc");
    }

    #[test]
    fn test_untyped_event_is_message() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n");

        assert_eq!(events.len(), 1);
        assert!(events[0].is_message());
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: mess").is_empty());
        assert!(parser.feed(b"age\ndata: {\"id\":").is_empty());

        let events = parser.feed(b"2}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_message());
        assert_eq!(events[0].data, "{\"id\":2}");
    }

    #[test]
    fn test_multiline_data_and_id() {
        let mut parser = SseParser::new();
        let events = parser.feed_str("id: 9\ndata: one\ndata: two\n\n");

        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[0].id.as_deref(), Some("9"));
    }

    #[test]
    fn test_keepalive_comments_and_empty_events_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b": ping\n\n\n").is_empty());

        let events = parser.feed(b"event: ping\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_message());
    }

    #[test]
    fn test_done_marker() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"choices\":[]}\n\ndata: [DONE]\n\n");

        assert_eq!(events.len(), 2);
        assert!(!events[0].is_done());
        assert!(events[1].is_done());
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed_str("event: message\ndata: {}").is_empty());

        let event = parser.finish().unwrap();
        assert_eq!(event.data, "{}");
        assert!(parser.finish().is_none());
    }
}
