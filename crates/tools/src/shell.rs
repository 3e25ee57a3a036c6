//! `run_shell_command`: execute a command line with `bash -c`.
//!
//! The command runs to completion or until its timeout; the child is killed
//! if the timeout fires or the call is dropped.

use std::time::Duration;

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{Tool, ToolOutput, ToolSpec};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::required_str;

/// Upper bound for a model-requested timeout.
const MAX_TIMEOUT_SECS: u64 = 600;

pub struct ShellTool {
    default_timeout_secs: u64,
}

impl ShellTool {
    pub fn new(default_timeout_secs: u64) -> Self {
        Self {
            default_timeout_secs: default_timeout_secs.max(1),
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new(30)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Executes a shell command and returns its output."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                },
                "reason": {
                    "type": "string",
                    "description": "Optional reason for running the command."
                },
                "timeout": {
                    "type": "integer",
                    "description": format!(
                        "Timeout in seconds (default: {}). Raise it for long-running commands.",
                        self.default_timeout_secs
                    ),
                    "minimum": 1
                }
            },
            "required": ["command"]
        })
    }

    fn spec(&self) -> ToolSpec {
        // The outer limit must not cut a command short of its own timeout.
        ToolSpec::internal(self.description(), self.parameters_schema())
            .with_approval_key_exclude(&["reason", "timeout"])
            .with_timeout_secs(MAX_TIMEOUT_SECS + 5)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let command = required_str(&arguments, "command")?;
        let reason = arguments["reason"].as_str().filter(|r| !r.is_empty());
        let timeout_secs = arguments["timeout"]
            .as_u64()
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, MAX_TIMEOUT_SECS);

        debug!(command = %command, timeout_secs, "Executing shell command");

        let child = Command::new("bash")
            .args(["-c", command])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "run_shell_command".into(),
                reason: e.to_string(),
            })?;

        let output =
            match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
                .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Ok(ToolOutput::failure(format!(
                        "Error executing command '{command}': {e}"
                    )));
                }
                Err(_) => {
                    warn!(command = %command, timeout_secs, "Shell command timed out");
                    return Ok(ToolOutput::failure(format!(
                        "Error: Command '{command}' timed out after {timeout_secs} seconds.\n\
                         To retry with a longer timeout, pass a larger \"timeout\" argument."
                    )));
                }
            };

        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut text = format!("Command: {command}\n");
        if let Some(reason) = reason {
            text.push_str(&format!("Reason: {reason}\n"));
        }
        text.push_str(&format!("Return code: {code}\n"));
        if !stdout.is_empty() {
            text.push_str(&format!("Stdout:\n{stdout}\n"));
        }
        if !stderr.is_empty() {
            text.push_str(&format!("Stderr:\n{stderr}\n"));
        }

        Ok(ToolOutput {
            content: text,
            is_error: !output.status.success(),
        })
    }
}

/// The program a shell command line starts with, e.g. `git` for
/// `FOO=1 /usr/bin/git status`. Used to scope approvals.
pub fn main_command(command_line: &str) -> Option<String> {
    command_line
        .split_whitespace()
        .find(|word| !(word.contains('=') && !word.starts_with('=')))
        .map(|word| {
            word.rsplit('/')
                .next()
                .unwrap_or(word)
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string()
        })
        .filter(|name| !name.is_empty())
}

/// Shell syntax that can make a command line do more than its first
/// program suggests. Checked longest first so `&&` is not reported as `&`.
const RISKY_SYNTAX: &[(&str, &str)] = &[
    ("&&", "command chaining (&&)"),
    ("||", "command chaining (||)"),
    ("$(", "command substitution ($(...))"),
    ("`", "command substitution (backticks)"),
    (";", "command separator (;)"),
    ("|", "pipe (|)"),
    (">", "output redirection (>)"),
    ("&", "background execution (&)"),
];

/// Why approving `command_line` by its program name alone would be unsafe,
/// if it is. Such commands always need an explicit approval.
pub fn risky_pattern(command_line: &str) -> Option<&'static str> {
    if let Some((_, reason)) = RISKY_SYNTAX
        .iter()
        .find(|(syntax, _)| command_line.contains(syntax))
    {
        return Some(reason);
    }
    command_line
        .split_whitespace()
        .any(|word| matches!(word, "sudo" | "su" | "doas"))
        .then_some("privilege escalation (sudo/su)")
}
