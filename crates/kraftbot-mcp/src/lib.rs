//! # kraftbot-mcp
//!
//! MCP (Model Context Protocol) server registry for KraftBot.
//!
//! This crate provides:
//! - Server descriptors for the stdio, SSE and streamable HTTP transports
//! - A name-keyed registry of configured servers ([`McpManager`])
//! - Lazily connecting tool sources handed to the agent
//! - A merged tool namespace over many sources ([`Toolset`])
//! - Answering server sampling requests through a [`SamplingHandler`]
//!
//! Registering a server never performs I/O. The connection is opened the
//! first time the agent lists or calls tools on its handle.

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod remote;
pub mod sampling;
pub mod source;
pub mod toolset;
pub mod transport;

pub use kraftbot_core::sse;

pub use config::{Endpoint, McpServerConfig, McpServerInfo, ServerOptions, TransportKind};
pub use error::{McpError, TransportError};
pub use manager::McpManager;
pub use protocol::{
    CallToolResult, CreateMessageParams, CreateMessageResult, McpToolDefinition, SamplingContent,
    SamplingMessage, ToolContent,
};
pub use sampling::SamplingHandler;
pub use source::{DefaultHandleFactory, HandleFactory, ToolSource};
pub use toolset::{DiscoveryFailure, Toolset};
