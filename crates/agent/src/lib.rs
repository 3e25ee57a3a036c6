//! The agent side of ferrocode.
//!
//! A user message goes through a **request → tools → request** cycle:
//!
//! 1. **Append** the message to the transcript
//! 2. **Request** a full assistant turn through the retry controller
//! 3. **If tool calls**: run them through the [`ToolExecutionPipeline`]
//!    (validation, plan-mode gate, [`ApprovalGate`], dispatch), append the
//!    results and go back to step 2
//! 4. **If text only**: append it and hand control back to the user
//!
//! Cancelling the token discards the in-flight response and returns to the
//! prompt. Tools that are already running finish or time out on their own.

pub mod approval;
pub mod loop_runner;
pub mod pipeline;
pub mod stream_event;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use approval::{
    ApprovalChoice, ApprovalGate, ApprovalPrompter, ApprovalRecord, ApprovalReply,
    ApprovalRequest, ApprovalState, GateDecision, GateVerdict,
};
pub use loop_runner::{ConversationLoop, LoopOptions, TurnReport, TurnStatus};
pub use pipeline::{ExecutionMode, PipelineOptions, ToolExecutionPipeline, UserGuidance};
pub use stream_event::AgentStreamEvent;
pub use validator::SchemaValidator;
