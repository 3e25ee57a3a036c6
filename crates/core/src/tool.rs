//! Tools: assembled calls, results, per-tool metadata and the executor registry.
//!
//! A tool is a name bound to a [`ToolSpec`] (what the model sees plus the
//! approval/plan-mode/timeout policy) and a [`ToolExecutor`] (how it runs).
//! Executors are polymorphic over [`ToolKind`]: in-process functions, command
//! templates, JSON-RPC endpoints and MCP stdio servers all register the same way.
//! Plugins are [`ToolSource`]s that register into the registry at startup;
//! registering an existing name replaces it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A tool invocation assembled from the model's output.
///
/// `raw_arguments` is the exact text the model produced. It is parsed once at
/// construction; a parse failure marks the call invalid so the pipeline can
/// answer it with an error result instead of executing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    /// Call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Accumulated JSON text of the arguments
    pub raw_arguments: String,

    /// Positional slot the call was streamed in
    pub slot_index: u32,

    #[serde(skip)]
    arguments: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    parse_error: Option<String>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
        slot_index: u32,
    ) -> Self {
        let raw_arguments = raw_arguments.into();
        // Some backends send nothing at all for argument-less calls.
        let parsed = if raw_arguments.trim().is_empty() {
            Ok(serde_json::Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str::<serde_json::Value>(&raw_arguments)
        };
        let (arguments, parse_error) = match parsed {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments,
            slot_index,
            arguments,
            parse_error,
        }
    }

    /// Whether the arguments parsed as JSON.
    pub fn is_valid(&self) -> bool {
        self.parse_error.is_none()
    }

    /// Parsed arguments, present only for valid calls.
    pub fn arguments(&self) -> Option<&serde_json::Value> {
        self.arguments.as_ref()
    }

    /// Why the arguments failed to parse.
    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }
}

/// The outcome of one tool call, ready to be appended as a tool message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result answers
    pub tool_call_id: String,

    /// The tool name
    pub name: String,

    /// Output text sent back to the model
    pub content: String,

    /// Whether the call failed (invalid, denied, blocked, or the tool errored)
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: id.into(),
            name: name.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// How a tool is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolKind {
    /// In-process Rust function
    #[default]
    #[serde(rename = "internal")]
    Internal,
    /// Shell command template with `{param}` placeholders
    #[serde(rename = "command")]
    Command,
    /// JSON-RPC 2.0 call over HTTP
    #[serde(rename = "jsonrpc")]
    JsonRpc,
    /// Subprocess speaking line-delimited JSON-RPC on stdio
    #[serde(rename = "mcp-stdio")]
    McpStdio,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Internal => "internal",
            Self::Command => "command",
            Self::JsonRpc => "jsonrpc",
            Self::McpStdio => "mcp-stdio",
        };
        f.write_str(s)
    }
}

/// Tool metadata and policy, as found in tool definition files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: ToolKind,

    #[serde(default)]
    pub description: String,

    /// JSON Schema of the arguments
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,

    /// Skip the approval prompt entirely
    #[serde(default)]
    pub auto_approved: bool,

    #[serde(default = "default_true")]
    pub available_in_plan_mode: bool,

    /// Approve by tool name alone instead of name plus arguments
    #[serde(default)]
    pub approval_excludes_arguments: bool,

    /// Arguments left out of the approval fingerprint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approval_key_exclude_arguments: Vec<String>,

    /// Output character budget (falls back to the global default)
    #[serde(
        default,
        alias = "truncated_chars",
        skip_serializing_if = "Option::is_none"
    )]
    pub truncation_limit: Option<usize>,

    /// Execution timeout (falls back to the per-kind default)
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Command template (`command` kind) or server command line (`mcp-stdio` kind)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Command template run before the approval prompt (`command` kind); its
    /// output is shown to the user, e.g. `git diff {path}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_command: Option<String>,

    /// Endpoint for the `jsonrpc` kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// JSON-RPC method name (defaults to the tool name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// MCP server that hosts this tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    #[serde(default)]
    pub disabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolSpec {
    /// Spec for an in-process tool.
    pub fn internal(description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            kind: ToolKind::Internal,
            description: description.into(),
            parameters,
            auto_approved: false,
            available_in_plan_mode: true,
            approval_excludes_arguments: false,
            approval_key_exclude_arguments: Vec::new(),
            truncation_limit: None,
            timeout_secs: None,
            command: None,
            preview_command: None,
            url: None,
            method: None,
            server: None,
            disabled: false,
        }
    }

    pub fn with_auto_approved(mut self, auto: bool) -> Self {
        self.auto_approved = auto;
        self
    }

    pub fn with_plan_mode(mut self, available: bool) -> Self {
        self.available_in_plan_mode = available;
        self
    }

    pub fn with_approval_excludes_arguments(mut self, excludes: bool) -> Self {
        self.approval_excludes_arguments = excludes;
        self
    }

    pub fn with_approval_key_exclude(mut self, arguments: &[&str]) -> Self {
        self.approval_key_exclude_arguments = arguments.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Whether an approval applies only to the exact arguments it was given.
    pub fn approval_scope_includes_arguments(&self) -> bool {
        !self.approval_excludes_arguments
    }
}

/// What an executor hands back before truncation and correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Runs a tool of one kind.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `name` with already-validated arguments.
    async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Extra context for the approval prompt. Only asked for when a prompt
    /// is actually shown.
    async fn preview(&self, _name: &str, _arguments: &serde_json::Value) -> Option<String> {
        None
    }
}

/// An in-process tool (read_file, run_shell_command, ...).
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Approval and plan-mode policy. Defaults to "prompt, allowed in plan mode".
    fn spec(&self) -> ToolSpec {
        ToolSpec::internal(self.description(), self.parameters_schema())
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError>;
}

/// Adapts a [`Tool`] to the [`ToolExecutor`] interface.
struct InternalExecutor {
    tool: Box<dyn Tool>,
}

#[async_trait]
impl ToolExecutor for InternalExecutor {
    async fn execute(
        &self,
        _name: &str,
        arguments: &serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError> {
        self.tool.execute(arguments.clone()).await
    }
}

/// A tool bound to its spec and executor.
#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub spec: ToolSpec,
    pub executor: Arc<dyn ToolExecutor>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name)
            .field("kind", &self.spec.kind)
            .finish()
    }
}

/// A registry of available tools, keyed by name.
///
/// The agent uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up the spec and executor when the LLM requests a tool
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        spec: ToolSpec,
        executor: Arc<dyn ToolExecutor>,
    ) {
        let name = name.into();
        if self.tools.contains_key(&name) {
            tracing::debug!(tool = %name, "Overriding registered tool");
        }
        self.tools.insert(
            name.clone(),
            RegisteredTool {
                name,
                spec,
                executor,
            },
        );
    }

    /// Register an in-process tool under its own name.
    pub fn register_tool(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        let spec = tool.spec();
        self.register(name, spec, Arc::new(InternalExecutor { tool }));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Get all tool definitions (for sending to the LLM), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.spec.description.clone(),
                parameters: t.spec.parameters.clone(),
            })
            .collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// A provider of tools (built-ins, a definitions file, a plugin).
///
/// Sources are applied in order at startup; later sources override earlier
/// ones on name clashes.
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// A short label for logs.
    fn name(&self) -> &str;

    /// Register this source's tools, returning how many were added.
    async fn register(&self, registry: &mut ToolRegistry) -> std::result::Result<usize, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec::internal(self.description(), self.parameters_schema())
                .with_auto_approved(true)
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> std::result::Result<ToolOutput, ToolError> {
            Ok(ToolOutput::success(
                arguments["text"].as_str().unwrap_or("").to_string(),
            ))
        }
    }

    #[test]
    fn tool_call_parses_arguments_once() {
        let call = ToolCall::new("c1", "echo", r#"{"text":"hi"}"#, 0);
        assert!(call.is_valid());
        assert_eq!(call.arguments().unwrap()["text"], "hi");
    }

    #[test]
    fn tool_call_with_broken_json_is_invalid() {
        let call = ToolCall::new("c1", "echo", r#"{"text":"#, 0);
        assert!(!call.is_valid());
        assert!(call.arguments().is_none());
        assert!(call.parse_error().is_some());
    }

    #[test]
    fn empty_arguments_mean_empty_object() {
        let call = ToolCall::new("c1", "pwd", "  ", 3);
        assert!(call.is_valid());
        assert_eq!(call.arguments().unwrap(), &serde_json::json!({}));
    }

    #[test]
    fn spec_defaults_from_json() {
        let spec: ToolSpec = serde_json::from_str(
            r#"{"type":"command","description":"List","command":"ls {path}","preview_command":"stat {path}","truncated_chars":500}"#,
        )
        .unwrap();
        assert_eq!(spec.kind, ToolKind::Command);
        assert!(spec.available_in_plan_mode);
        assert!(!spec.auto_approved);
        assert_eq!(spec.truncation_limit, Some(500));
        assert_eq!(spec.preview_command.as_deref(), Some("stat {path}"));
        assert!(spec.approval_scope_includes_arguments());
        assert_eq!(spec.parameters["type"], "object");
    }

    #[test]
    fn kind_names_round_trip_through_serde() {
        let kind: ToolKind = serde_json::from_str(r#""mcp-stdio""#).unwrap();
        assert_eq!(kind, ToolKind::McpStdio);
        assert_eq!(kind.to_string(), "mcp-stdio");
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Box::new(EchoTool));
        let tool = registry.get("echo").unwrap();
        assert!(tool.spec.auto_approved);
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Box::new(EchoTool));
        registry.register(
            "alpha",
            ToolSpec::internal("first", default_parameters()),
            registry.get("echo").unwrap().executor.clone(),
        );
        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "echo");
    }

    #[test]
    fn later_registration_overrides() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Box::new(EchoTool));
        let executor = registry.get("echo").unwrap().executor.clone();
        registry.register(
            "echo",
            ToolSpec::internal("replaced", default_parameters()),
            executor,
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().spec.description, "replaced");
    }

    #[tokio::test]
    async fn registered_executor_runs_tool() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Box::new(EchoTool));

        let tool = registry.get("echo").unwrap();
        let output = tool
            .executor
            .execute("echo", &serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert!(!output.is_error);
        assert_eq!(output.content, "hello world");
    }
}
