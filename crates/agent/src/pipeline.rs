//! Tool execution pipeline.
//!
//! Turns the tool calls of one assistant turn into exactly one
//! [`ToolResult`] each, in input order. Every call goes through the same
//! steps:
//!
//! 1. **Shape**: a call without a name or with unparseable arguments fails.
//! 2. **Lookup** in the [`ToolRegistry`].
//! 3. **Validate** the arguments against the tool's schema.
//! 4. **Plan-mode gate**: in plan mode, tools marked unavailable and the
//!    built-in writers are refused.
//! 5. **Approve** through the [`ApprovalGate`]. If a prompt is needed, the
//!    executor's preview runs first so the user sees what would change.
//! 6. **Dispatch** to the executor under the tool's timeout, then truncate.
//!
//! Any failure becomes an error result and the batch moves on. A "cancel all"
//! answer at a prompt turns that call and every later one into a cancelled
//! result without running them.
//!
//! Guidance typed at a prompt is kept per call until the caller collects it
//! with [`ToolExecutionPipeline::take_guidance`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ferrocode_config::{KindTimeouts, ToolsConfig};
use ferrocode_core::error::ToolError;
use ferrocode_core::event::{DomainEvent, EventBus};
use ferrocode_core::tool::{
    ToolCall, ToolExecutor, ToolKind, ToolOutput, ToolRegistry, ToolResult, ToolSpec,
};
use tracing::{debug, info, warn};

use crate::approval::{ApprovalGate, ApprovalState, GateDecision};
use crate::validator::SchemaValidator;

/// Writers that plan mode always refuses, whatever their spec says.
pub const PLAN_MODE_BLOCKED_TOOLS: &[&str] = &["write_file", "edit_file", "create_backup"];

pub const DENIED_MESSAGE: &str =
    "Error: Tool execution denied by the user. Ask how they would like to proceed.";
pub const CANCELLED_MESSAGE: &str = "Error: Tool call cancelled by the user.";

/// Whether the agent may change things.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Read and analyze only
    Plan,
    #[default]
    Build,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => f.write_str("plan"),
            Self::Build => f.write_str("build"),
        }
    }
}

/// A note the user attached to an approval answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGuidance {
    pub tool_call_id: String,
    pub tool_name: String,
    pub text: String,
}

impl UserGuidance {
    /// The user message that hands the note to the model.
    pub fn to_message_text(&self) -> String {
        format!(
            "User guidance for tool call ID {} ({}): {}",
            self.tool_call_id, self.tool_name, self.text
        )
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Output budget in characters when a tool has none; 0 disables truncation
    pub default_truncation_limit: usize,
    pub timeouts: KindTimeouts,
}

impl From<&ToolsConfig> for PipelineOptions {
    fn from(config: &ToolsConfig) -> Self {
        Self {
            default_truncation_limit: config.default_truncation_limit,
            timeouts: config.timeouts.clone(),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&ToolsConfig::default())
    }
}

impl PipelineOptions {
    fn timeout_for(&self, spec: &ToolSpec) -> Duration {
        let secs = spec.timeout_secs.unwrap_or(match spec.kind {
            ToolKind::Internal => self.timeouts.internal_secs,
            ToolKind::Command => self.timeouts.command_secs,
            ToolKind::JsonRpc => self.timeouts.jsonrpc_secs,
            ToolKind::McpStdio => self.timeouts.mcp_stdio_secs,
        });
        Duration::from_secs(secs.max(1))
    }

    fn truncation_for(&self, spec: &ToolSpec) -> usize {
        spec.truncation_limit.unwrap_or(self.default_truncation_limit)
    }
}

pub struct ToolExecutionPipeline {
    registry: Arc<ToolRegistry>,
    gate: ApprovalGate,
    validator: SchemaValidator,
    options: PipelineOptions,
    events: Option<Arc<EventBus>>,
    guidance: Vec<UserGuidance>,
}

impl ToolExecutionPipeline {
    pub fn new(registry: Arc<ToolRegistry>, gate: ApprovalGate, options: PipelineOptions) -> Self {
        Self {
            registry,
            gate,
            validator: SchemaValidator::new(),
            options,
            events: None,
            guidance: Vec::new(),
        }
    }

    /// Publish a `ToolExecuted` event for every resolved call.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut ApprovalGate {
        &mut self.gate
    }

    /// Guidance collected since the last call, in call order.
    pub fn take_guidance(&mut self) -> Vec<UserGuidance> {
        std::mem::take(&mut self.guidance)
    }

    /// Resolve every call, in order.
    pub async fn run(&mut self, calls: &[ToolCall], mode: ExecutionMode) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        let mut cancelled = false;

        for call in calls {
            let started = Instant::now();
            let result = if cancelled {
                ToolResult::error(&call.id, &call.name, CANCELLED_MESSAGE)
            } else {
                match self.run_one(call, mode).await {
                    Ok(result) => result,
                    Err(ToolError::Cancelled(_)) => {
                        cancelled = true;
                        info!(tool = %call.name, "Remaining tool calls cancelled by the user");
                        ToolResult::error(&call.id, &call.name, CANCELLED_MESSAGE)
                    }
                    Err(e) => ToolResult::error(&call.id, &call.name, error_text(&e)),
                }
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            debug!(
                tool = %call.name,
                success = !result.is_error,
                duration_ms,
                "Tool call resolved"
            );
            if let Some(events) = &self.events {
                events.publish(DomainEvent::ToolExecuted {
                    tool_name: call.name.clone(),
                    success: !result.is_error,
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            results.push(result);
        }

        results
    }

    async fn run_one(&mut self, call: &ToolCall, mode: ExecutionMode) -> Result<ToolResult, ToolError> {
        if call.name.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "Error: Tool call has no tool name.".into(),
            ));
        }
        let Some(arguments) = call.arguments() else {
            return Err(ToolError::InvalidArguments(format!(
                "Error: Invalid JSON in arguments for '{}': {}. Send the arguments as a single JSON object.",
                call.name,
                call.parse_error().unwrap_or("unparseable")
            )));
        };

        let Some(tool) = self.registry.get(&call.name) else {
            return Err(ToolError::NotFound(format!(
                "'{}'. Available tools: {}",
                call.name,
                self.registry.names().join(", ")
            )));
        };
        let spec = &tool.spec;
        let executor = Arc::clone(&tool.executor);

        self.validator
            .validate(&call.name, &spec.parameters, arguments)?;

        if mode == ExecutionMode::Plan
            && (!spec.available_in_plan_mode || PLAN_MODE_BLOCKED_TOOLS.contains(&call.name.as_str()))
        {
            return Err(ToolError::PlanModeBlocked {
                tool_name: call.name.clone(),
            });
        }

        let preview = match self.gate.check(&call.name, spec, arguments) {
            ApprovalState::NeedsPrompt => executor.preview(&call.name, arguments).await,
            _ => None,
        };
        let verdict = self
            .gate
            .resolve_with_preview(&call.name, spec, arguments, preview.as_deref())
            .await;
        if let Some(text) = verdict.guidance {
            self.guidance.push(UserGuidance {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                text,
            });
        }

        match verdict.decision {
            GateDecision::Allowed => {}
            GateDecision::Denied => {
                return Err(ToolError::ApprovalDenied {
                    tool_name: call.name.clone(),
                });
            }
            GateDecision::CancelAll => {
                return Err(ToolError::Cancelled(call.name.clone()));
            }
        }

        let timeout = self.options.timeout_for(spec);
        let limit = self.options.truncation_for(spec);
        let output = dispatch(executor, &call.name, arguments, timeout).await?;

        let content = truncate(&output.content, limit);
        Ok(ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            is_error: output.is_error,
        })
    }
}

/// Run the executor on its own task so a panic stays local and a timeout
/// can abort it.
async fn dispatch(
    executor: Arc<dyn ToolExecutor>,
    name: &str,
    arguments: &serde_json::Value,
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    let tool_name = name.to_string();
    let args = arguments.clone();
    let mut handle = tokio::spawn(async move { executor.execute(&tool_name, &args).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            warn!(tool = %name, error = %join_error, "Tool task failed");
            Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: if join_error.is_panic() {
                    "the tool panicked".into()
                } else {
                    join_error.to_string()
                },
            })
        }
        Err(_) => {
            handle.abort();
            warn!(tool = %name, timeout_secs = timeout.as_secs(), "Tool timed out");
            Err(ToolError::Timeout {
                tool_name: name.to_string(),
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}

fn error_text(error: &ToolError) -> String {
    match error {
        // Validation messages are already phrased for the model.
        ToolError::InvalidArguments(message) => message.clone(),
        ToolError::ApprovalDenied { .. } => DENIED_MESSAGE.to_string(),
        ToolError::PlanModeBlocked { tool_name } => format!(
            "Error: Tool '{tool_name}' is not available in plan mode. \
             Only read-only tools can run; ask the user to switch to build mode."
        ),
        other => format!("Error: {other}"),
    }
}

/// Cut `content` to `limit` characters and say so. A limit of 0 keeps everything.
pub fn truncate(content: &str, limit: usize) -> String {
    if limit == 0 {
        return content.to_string();
    }
    let total = content.chars().count();
    if total <= limit {
        return content.to_string();
    }
    let kept: String = content.chars().take(limit).collect();
    format!("{kept}\n... [output truncated: showing {limit} of {total} characters]")
}
