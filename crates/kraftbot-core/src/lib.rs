//! # kraftbot-core
//!
//! Core types and abstractions for KraftBot - the terminal chat client that
//! connects an OpenRouter-hosted model to MCP tool servers.
//!
//! This crate provides:
//! - Settings loading and validation
//! - The model catalog
//! - Message and tool primitives shared by the provider and agent crates
//! - System prompt loading from Markdown files
//! - Server-Sent Events parsing
//! - Common error types

pub mod config;
pub mod error;
pub mod message;
pub mod models;
pub mod prompt;
pub mod sse;
pub mod tool;

pub use config::{McpServerSettings, Settings};
pub use error::{Error, ProviderError, Result};
pub use message::{Message, Role};
pub use models::ModelConfig;
pub use prompt::PromptLoader;
pub use tool::{ToolCall, ToolDefinition, ToolResult};
