//! Server-initiated sampling.
//!
//! A server that was offered the sampling capability may send
//! `sampling/createMessage` while one of its tools runs. The connection
//! hands those requests to a [`SamplingHandler`], usually backed by the
//! agent's model.

use async_trait::async_trait;

use crate::error::McpError;
use crate::protocol::{CreateMessageParams, CreateMessageResult};

/// Serves model completions requested by an MCP server.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, McpError>;
}
