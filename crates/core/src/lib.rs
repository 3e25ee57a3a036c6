//! # ferrocode Core
//!
//! Domain types, traits, and error definitions for the ferrocode agent runtime.
//! This crate carries no transport or terminal code. It defines the model
//! that the provider, tool, agent and CLI crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: transcript messages and the append-only [`Conversation`]
//! - [`tool`]: assembled tool calls, results, tool metadata and the executor registry
//! - [`provider`]: chat requests and the [`ChatBackend`] seam over the network
//! - [`event`]: domain events for statistics and observers
//! - [`error`]: the error taxonomy shared by every crate

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use provider::{ChatBackend, ChatRequest, ResponseBody, ToolDefinition, Usage};
pub use tool::{
    Tool, ToolCall, ToolExecutor, ToolKind, ToolOutput, ToolRegistry, ToolResult, ToolSource,
    ToolSpec,
};
