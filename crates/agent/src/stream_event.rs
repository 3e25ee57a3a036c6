//! Agent-level events for a front end.
//!
//! `AgentStreamEvent` is what the conversation loop reports while it works:
//! streamed text, tool calls and their results, and how the turn ended. The
//! CLI renders them; tests collect them.

use ferrocode_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the conversation loop during a turn.
///
/// - `chunk`: streamed text from the model
/// - `tool_call`: the model asked for a tool
/// - `tool_result`: the call resolved (ran, was denied, blocked or invalid)
/// - `retrying`: a request failed and will be sent again; if text was already
///   streamed, the retry repeats it
/// - `warning`: something the user should know that did not end the turn
/// - `cancelled`: the user interrupted the in-flight request
/// - `done`: the turn is complete
/// - `error`: the request failed after retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Chunk { content: String },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    Retrying {
        attempt: u32,
        delay_ms: u64,
        reason: String,
        partial_output: bool,
    },

    Warning { message: String },

    Cancelled,

    Done {
        conversation_id: String,
        usage: Option<Usage>,
        iterations: u32,
        tool_calls_made: usize,
    },

    Error { message: String },
}

impl AgentStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Retrying { .. } => "retrying",
            Self::Warning { .. } => "warning",
            Self::Cancelled => "cancelled",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
