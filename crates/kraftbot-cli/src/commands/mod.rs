//! CLI command implementations.

pub mod chat;
pub mod compare;
pub mod mcp;
pub mod models;
pub mod prompts;
pub mod status;
