//! # kraftbot-providers
//!
//! LLM provider abstraction for KraftBot.
//!
//! This crate provides:
//! - The [`Provider`] trait the agent talks to
//! - An OpenRouter implementation of the OpenAI-compatible chat API, whole
//!   or streamed

pub mod openrouter;
pub mod traits;

pub use openrouter::OpenRouterProvider;
pub use traits::{
    completion_as_stream, CompletionRequest, CompletionResponse, CompletionStream, FinishReason, Provider, StreamChunk,
    ToolCallDelta, Usage,
};
