//! The conversation loop.

use ferrocode_config::AppConfig;
use ferrocode_core::message::{Conversation, Message};
use ferrocode_core::provider::{ChatRequest, Usage};
use ferrocode_core::tool::ToolCall;
use ferrocode_providers::{RetryController, RetryNotice, TurnOutcome};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::{ExecutionMode, ToolExecutionPipeline};
use crate::stream_event::AgentStreamEvent;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are ferrocode, a coding assistant working in the \
user's current directory. Use the available tools to inspect and change files and to run \
commands. Read before you edit, keep changes minimal, and explain what you did.";

/// Request settings and limits for [`ConversationLoop`].
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    /// Automatic model rounds allowed per user message
    pub max_iterations: u32,
    pub system_prompt: String,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for LoopOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.api.model.clone(),
            temperature: config.api.temperature,
            max_tokens: config.api.max_tokens,
            stream: config.streaming.enabled,
            max_iterations: 50,
            system_prompt: config
                .api
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Cancelled,
    Failed(String),
    /// Stopped after `max_iterations` rounds that all asked for tools
    MaxIterations,
}

/// Summary of one user turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub status: TurnStatus,
    pub iterations: u32,
    pub tool_calls_made: usize,
    /// Text of the final assistant message
    pub content: String,
    pub usage: Option<Usage>,
}

/// Owns the transcript and drives request rounds and tool batches until the
/// model answers without asking for tools.
pub struct ConversationLoop {
    controller: RetryController,
    pipeline: ToolExecutionPipeline,
    conversation: Conversation,
    options: LoopOptions,
    mode: ExecutionMode,
    mode_notice_pending: bool,
    events: Option<mpsc::UnboundedSender<AgentStreamEvent>>,
}

impl ConversationLoop {
    pub fn new(
        controller: RetryController,
        pipeline: ToolExecutionPipeline,
        options: LoopOptions,
    ) -> Self {
        let conversation = Conversation::with_system_prompt(options.system_prompt.clone());
        Self {
            controller,
            pipeline,
            conversation,
            options,
            mode: ExecutionMode::Build,
            mode_notice_pending: false,
            events: None,
        }
    }

    /// Send [`AgentStreamEvent`]s to `events` while turns run.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<AgentStreamEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Switch mode. The next user message tells the model about the change.
    pub fn set_mode(&mut self, mode: ExecutionMode) {
        if mode != self.mode {
            info!(from = %self.mode, to = %mode, "Execution mode changed");
            self.mode = mode;
            self.mode_notice_pending = true;
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn pipeline(&self) -> &ToolExecutionPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut ToolExecutionPipeline {
        &mut self.pipeline
    }

    pub fn controller(&self) -> &RetryController {
        &self.controller
    }

    /// Process one user message to completion, cancellation or failure.
    pub async fn run_turn(&mut self, user_input: &str, cancel: &CancellationToken) -> TurnReport {
        let content = self.decorate(user_input);
        self.conversation.push(Message::user(content));

        let mut report = TurnReport {
            status: TurnStatus::Completed,
            iterations: 0,
            tool_calls_made: 0,
            content: String::new(),
            usage: None,
        };

        loop {
            if report.iterations >= self.options.max_iterations {
                warn!(
                    max_iterations = self.options.max_iterations,
                    "Max iterations reached, stopping"
                );
                self.emit(AgentStreamEvent::Warning {
                    message: format!(
                        "Stopped after {} rounds of tool calls. Send a message to continue.",
                        self.options.max_iterations
                    ),
                });
                report.status = TurnStatus::MaxIterations;
                break;
            }
            report.iterations += 1;

            let request = self.request();
            let sender = self.events.clone();
            let mut on_content = move |text: &str| {
                if let Some(tx) = &sender {
                    let _ = tx.send(AgentStreamEvent::Chunk {
                        content: text.to_string(),
                    });
                }
            };
            let sender = self.events.clone();
            let mut on_retry = move |notice: &RetryNotice| {
                if let Some(tx) = &sender {
                    let _ = tx.send(AgentStreamEvent::Retrying {
                        attempt: notice.attempt,
                        delay_ms: notice.delay.as_millis() as u64,
                        reason: notice.reason.clone(),
                        partial_output: notice.partial_output,
                    });
                }
            };

            debug!(
                iteration = report.iterations,
                messages = request.messages.len(),
                "Requesting completion"
            );
            let outcome = self
                .controller
                .execute_with_notices(&request, cancel, &mut on_content, &mut on_retry)
                .await;
            let turn = match outcome {
                TurnOutcome::Completed(turn) => turn,
                TurnOutcome::Cancelled => {
                    info!("Turn cancelled by the user");
                    self.emit(AgentStreamEvent::Cancelled);
                    report.status = TurnStatus::Cancelled;
                    break;
                }
                TurnOutcome::Failed(error) => {
                    warn!(error = %error, "Request failed");
                    self.emit(AgentStreamEvent::Error {
                        message: error.to_string(),
                    });
                    report.status = TurnStatus::Failed(error.to_string());
                    break;
                }
            };

            if let Some(usage) = turn.usage {
                report.usage.get_or_insert_with(Usage::default).add(usage);
            }

            if turn.tool_calls.is_empty() {
                self.conversation.push(Message::assistant(&turn.content));
                report.content = turn.content;
                break;
            }

            self.conversation
                .push(Message::assistant_with_tools(&turn.content, &turn.tool_calls));
            report.tool_calls_made += turn.tool_calls.len();
            self.run_tools(&turn.tool_calls).await;
        }

        self.emit(AgentStreamEvent::Done {
            conversation_id: self.conversation.id.clone(),
            usage: report.usage,
            iterations: report.iterations,
            tool_calls_made: report.tool_calls_made,
        });
        report
    }

    async fn run_tools(&mut self, calls: &[ToolCall]) {
        for call in calls {
            self.emit(AgentStreamEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments().cloned().unwrap_or(serde_json::Value::Null),
            });
        }

        let results = self.pipeline.run(calls, self.mode).await;
        for result in results {
            self.emit(AgentStreamEvent::ToolResult {
                id: result.tool_call_id.clone(),
                name: result.name.clone(),
                output: result.content.clone(),
                success: !result.is_error,
            });
            self.conversation.push(Message::tool_result(&result));
        }

        // Tool messages must directly follow the assistant message that asked
        // for them, so guidance goes after the whole batch.
        for guidance in self.pipeline.take_guidance() {
            debug!(tool = %guidance.tool_name, "Forwarding user guidance");
            self.conversation
                .push(Message::user(guidance.to_message_text()));
        }
    }

    fn request(&self) -> ChatRequest {
        let mut request = ChatRequest::new(
            self.options.model.clone(),
            self.conversation.messages().to_vec(),
        );
        request.temperature = self.options.temperature;
        request.max_tokens = self.options.max_tokens;
        request.tools = self.pipeline.registry().definitions();
        request.stream = self.options.stream;
        request
    }

    fn decorate(&mut self, user_input: &str) -> String {
        if !self.mode_notice_pending {
            return user_input.to_string();
        }
        self.mode_notice_pending = false;
        format!("{user_input}\n\n{}", mode_reminder(self.mode))
    }

    fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn mode_reminder(mode: ExecutionMode) -> String {
    let body = match mode {
        ExecutionMode::Plan => {
            "The session is now in PLAN mode. Read and analyze only; tools that \
             change files are unavailable. Propose a plan and wait for the user \
             to switch to build mode."
        }
        ExecutionMode::Build => {
            "The session is now in BUILD mode. All tools are available; carry out \
             the agreed changes."
        }
    };
    format!("<ferrocode_active_mode>\n{body}\n</ferrocode_active_mode>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::approval::{ApprovalChoice, ApprovalGate, ApprovalReply};
    use crate::pipeline::PipelineOptions;
    use crate::test_support::*;
    use ferrocode_core::error::ProviderError;
    use ferrocode_core::message::Role;
    use ferrocode_core::tool::ToolSpec;
    use ferrocode_providers::{CancellableTransport, RetryPolicy, TransportOptions};

    fn build(
        backend: Arc<ScriptedBackend>,
        registry: ferrocode_core::tool::ToolRegistry,
    ) -> ConversationLoop {
        assemble(
            backend,
            registry,
            Arc::new(ScriptedPrompter::new(vec![])),
            RetryPolicy::disabled(),
        )
    }

    fn assemble(
        backend: Arc<ScriptedBackend>,
        registry: ferrocode_core::tool::ToolRegistry,
        prompter: Arc<ScriptedPrompter>,
        policy: RetryPolicy,
    ) -> ConversationLoop {
        let transport = CancellableTransport::new(backend, TransportOptions::default());
        let controller = RetryController::new(transport, policy);
        let pipeline = ToolExecutionPipeline::new(
            Arc::new(registry),
            ApprovalGate::new(prompter, false),
            PipelineOptions::default(),
        );
        ConversationLoop::new(controller, pipeline, LoopOptions::default())
    }

    #[tokio::test]
    async fn streamed_text_becomes_one_assistant_message() {
        let backend = ScriptedBackend::new(vec![text_reply(&["Hel", "lo"])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut agent = build(backend.clone(), Default::default()).with_events(tx);

        let report = agent.run_turn("hi", &CancellationToken::new()).await;

        assert_eq!(report.status, TurnStatus::Completed);
        assert_eq!(report.content, "Hello");
        assert_eq!(report.iterations, 1);
        assert_eq!(backend.call_count(), 1);

        let messages = agent.conversation().messages();
        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Hello");
        assert!(last.tool_calls.is_empty());

        let mut chunks = String::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentStreamEvent::Chunk { content } = event {
                chunks.push_str(&content);
            }
        }
        assert_eq!(chunks, "Hello");
    }

    #[tokio::test]
    async fn tool_round_then_answer() {
        let backend = ScriptedBackend::new(vec![
            tool_reply("call_a", "lookup", r#"{"x":1}"#),
            text_reply(&["All done"]),
        ]);
        let spy = SpyExecutor::ok("lookup output");
        let registry = registry_with(vec![(
            "lookup",
            ToolSpec::internal("Lookup", serde_json::json!({"type": "object"}))
                .with_auto_approved(true),
            spy.clone(),
        )]);
        let mut agent = build(backend.clone(), registry);

        let report = agent.run_turn("go", &CancellationToken::new()).await;

        assert_eq!(report.status, TurnStatus::Completed);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.tool_calls_made, 1);
        assert_eq!(spy.calls(), 1);

        let roles: Vec<Role> = agent
            .conversation()
            .messages()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        let tool_msg = &agent.conversation().messages()[3];
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(tool_msg.content, "lookup output");

        // The second request carries the tool result.
        let second = &backend.requests()[1];
        assert_eq!(second.messages.len(), 4);
        assert!(!second.tools.is_empty());
    }

    #[tokio::test]
    async fn missing_tool_call_id_is_synthesized() {
        let backend = ScriptedBackend::new(vec![
            tool_reply("", "lookup", "{}"),
            text_reply(&["ok"]),
        ]);
        let registry = registry_with(vec![(
            "lookup",
            ToolSpec::internal("", serde_json::json!({})).with_auto_approved(true),
            SpyExecutor::ok("x"),
        )]);
        let mut agent = build(backend, registry);

        agent.run_turn("go", &CancellationToken::new()).await;

        let messages = agent.conversation().messages();
        assert_eq!(messages[2].tool_calls[0].id, "tool_call_0");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("tool_call_0"));
    }

    #[tokio::test]
    async fn cancelled_turn_appends_nothing_from_the_model() {
        let backend = ScriptedBackend::new(vec![text_reply(&["never"])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut agent = build(backend.clone(), Default::default()).with_events(tx);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = agent.run_turn("hi", &cancel).await;

        assert_eq!(report.status, TurnStatus::Cancelled);
        assert_eq!(backend.call_count(), 0);
        let messages = agent.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::User);

        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type())
            .collect();
        assert_eq!(kinds, vec!["cancelled", "done"]);
    }

    #[tokio::test]
    async fn failed_request_surfaces_error() {
        let backend = ScriptedBackend::new(vec![Err(ProviderError::AuthenticationFailed(
            "bad key".into(),
        ))]);
        let mut agent = build(backend, Default::default());

        let report = agent.run_turn("hi", &CancellationToken::new()).await;

        assert!(matches!(report.status, TurnStatus::Failed(ref m) if m.contains("bad key")));
        assert_eq!(agent.conversation().len(), 2);
    }

    #[tokio::test]
    async fn max_iterations_stops_tool_loop() {
        let backend = ScriptedBackend::new(vec![
            tool_reply("a", "lookup", "{}"),
            tool_reply("b", "lookup", "{}"),
        ]);
        let spy = SpyExecutor::ok("again");
        let registry = registry_with(vec![(
            "lookup",
            ToolSpec::internal("", serde_json::json!({})).with_auto_approved(true),
            spy.clone(),
        )]);
        let mut agent = build(backend.clone(), registry);
        agent.options.max_iterations = 2;

        let report = agent.run_turn("loop", &CancellationToken::new()).await;

        assert_eq!(report.status, TurnStatus::MaxIterations);
        assert_eq!(report.iterations, 2);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(spy.calls(), 2);
    }

    #[tokio::test]
    async fn mode_switch_adds_reminder_once() {
        let backend = ScriptedBackend::new(vec![text_reply(&["a"]), text_reply(&["b"])]);
        let mut agent = build(backend, Default::default());

        agent.set_mode(ExecutionMode::Plan);
        agent.run_turn("first", &CancellationToken::new()).await;
        agent.run_turn("second", &CancellationToken::new()).await;

        let users: Vec<&str> = agent
            .conversation()
            .messages()
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert!(users[0].starts_with("first\n\n<ferrocode_active_mode>"));
        assert!(users[0].contains("PLAN mode"));
        assert_eq!(users[1], "second");
    }

    #[tokio::test]
    async fn cancel_mid_stream_keeps_history_and_drops_partial_text() {
        let backend = ScriptedBackend::with_replies(vec![
            text_reply(&["first answer"]).into(),
            Reply::Hang(vec![content_frame("Hal"), content_frame("f a sent")]),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut agent = build(backend.clone(), Default::default()).with_events(tx);

        agent.run_turn("one", &CancellationToken::new()).await;
        while rx.try_recv().is_ok() {}
        let transcript = |agent: &ConversationLoop| -> Vec<(Role, String)> {
            agent
                .conversation()
                .messages()
                .iter()
                .map(|m| (m.role, m.content.clone()))
                .collect()
        };
        let before = transcript(&agent);
        assert_eq!(before.len(), 3);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watcher = tokio::spawn(async move {
            let mut kinds = Vec::new();
            let mut chunks = 0;
            while let Some(event) = rx.recv().await {
                if matches!(event, AgentStreamEvent::Chunk { .. }) {
                    chunks += 1;
                    if chunks == 2 {
                        trigger.cancel();
                    }
                }
                let done = matches!(event, AgentStreamEvent::Done { .. });
                kinds.push(event.event_type());
                if done {
                    break;
                }
            }
            kinds
        });

        let report = agent.run_turn("two", &cancel).await;
        let kinds = watcher.await.unwrap();

        assert_eq!(report.status, TurnStatus::Cancelled);
        assert_eq!(kinds, vec!["chunk", "chunk", "cancelled", "done"]);

        let after = transcript(&agent);
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(after[..before.len()], before[..]);
        assert_eq!(after.last(), Some(&(Role::User, "two".to_string())));
        assert!(after.iter().all(|(_, content)| !content.contains("Hal")));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_partial_text_is_announced() {
        let backend = ScriptedBackend::with_replies(vec![
            Reply::Break(
                vec![content_frame("Hel")],
                ProviderError::StreamInterrupted("connection reset by peer".into()),
            ),
            text_reply(&["Hello"]).into(),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut agent = assemble(
            backend.clone(),
            Default::default(),
            Arc::new(ScriptedPrompter::new(vec![])),
            RetryPolicy::default(),
        )
        .with_events(tx);

        let report = agent.run_turn("hi", &CancellationToken::new()).await;

        assert_eq!(report.status, TurnStatus::Completed);
        assert_eq!(report.content, "Hello");
        assert_eq!(backend.call_count(), 2);

        let events: Vec<AgentStreamEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["chunk", "retrying", "chunk", "done"]);
        assert!(matches!(
            events[1],
            AgentStreamEvent::Retrying { attempt: 1, partial_output: true, .. }
        ));
    }

    #[tokio::test]
    async fn approval_guidance_follows_the_tool_results() {
        let backend = ScriptedBackend::new(vec![
            tool_reply("call_g", "deploy", "{}"),
            text_reply(&["understood"]),
        ]);
        let spy = SpyExecutor::ok("deployed");
        let registry = registry_with(vec![(
            "deploy",
            ToolSpec::internal("", serde_json::json!({})),
            spy.clone(),
        )]);
        let prompter = Arc::new(ScriptedPrompter::with_replies(vec![ApprovalReply {
            choice: ApprovalChoice::Deny,
            guidance: Some("deploy to staging first".into()),
        }]));
        let mut agent = assemble(backend.clone(), registry, prompter, RetryPolicy::disabled());

        agent.run_turn("ship it", &CancellationToken::new()).await;

        assert_eq!(spy.calls(), 0);
        let second = &backend.requests()[1];
        let roles: Vec<Role> = second.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::User]
        );
        assert_eq!(
            second.messages[4].content,
            "User guidance for tool call ID call_g (deploy): deploy to staging first"
        );
    }
}
