//! Chat backend plumbing for ferrocode.
//!
//! A request flows through three layers:
//!
//! - [`OpenAiCompatBackend`] opens the HTTP request and maps failures.
//! - [`CancellableTransport`] decodes the body with [`WireEventParser`] and
//!   [`ToolCallAssembler`] under a cancellation token.
//! - [`RetryController`] classifies failures and retries with backoff.

pub mod assembler;
pub mod openai_compat;
pub mod retry;
pub mod transport;
pub mod wire;

pub use assembler::ToolCallAssembler;
pub use openai_compat::OpenAiCompatBackend;
pub use retry::{Classification, RetryController, RetryNotice, RetryPolicy, RetryState, classify};
pub use transport::{AssistantTurn, CancellableTransport, TransportOptions, TurnOutcome, UsageCounters};
pub use wire::{DeltaEvent, WireEventParser, decode_complete};
