//! # kraftbot-agent
//!
//! The conversational engine of KraftBot.
//!
//! This crate provides:
//! - The [`Agent`]: model, system prompt and a snapshot of MCP tools
//! - A bounded tool-call loop over the OpenRouter provider, whole or streamed
//! - Friendly classification of provider failures
//! - Agent setup from [`kraftbot_core::Settings`]
//! - Model-backed answers to MCP sampling requests

pub mod agent;
pub mod sampling;
pub mod setup;

pub use agent::{
    classify_error, Agent, AgentBuilder, AgentConfig, AgentError, AgentEventHandler, AgentResponse,
    AgentResult, NoOpEventHandler, TurnUsage, DEFAULT_SYSTEM_PROMPT,
};
pub use sampling::ProviderSampler;
pub use setup::{build_agent, AgentOptions, AgentSetup};
