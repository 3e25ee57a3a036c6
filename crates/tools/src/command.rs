//! Executor for `command` tools: a shell template with `{param}` placeholders.
//!
//! Values are substituted verbatim; the approval gate is what stands between
//! the model and the shell. The child is killed when the call is dropped, so
//! the pipeline's per-kind timeout is enough to stop a hung command.
//!
//! An optional preview template runs before the approval prompt so the user
//! sees what the command would touch (a diff, a file listing) before saying yes.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{ToolExecutor, ToolOutput};
use regex_lite::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

const PREVIEW_TIMEOUT: Duration = Duration::from_secs(60);

pub struct CommandExecutor {
    template: String,
    preview: Option<String>,
}

impl CommandExecutor {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            preview: None,
        }
    }

    pub fn with_preview(mut self, template: Option<String>) -> Self {
        self.preview = template;
        self
    }

    /// Fill `{name}` placeholders from `arguments`. `{{` and `}}` are literal braces.
    pub fn render(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        render_template(&self.template, arguments)
    }
}

fn render_template(template: &str, arguments: &serde_json::Value) -> Result<String, ToolError> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    let placeholder = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
        .ok_or_else(|| ToolError::InvalidArguments("placeholder pattern failed".into()))?;

    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        rendered.push_str(&template[last..whole.start()]);
        match caps.get(1) {
            Some(name) => {
                let value = arguments.get(name.as_str()).ok_or_else(|| {
                    ToolError::InvalidArguments(format!(
                        "missing argument '{}' for command template",
                        name.as_str()
                    ))
                })?;
                match value {
                    serde_json::Value::String(s) => rendered.push_str(s),
                    other => rendered.push_str(&other.to_string()),
                }
            }
            None => rendered.push_str(&whole.as_str()[..1]),
        }
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

#[async_trait]
impl ToolExecutor for CommandExecutor {
    async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let command = self.render(arguments)?;
        debug!(tool = %name, command = %command, "Executing command tool");

        let output = Command::new("bash")
            .args(["-c", &command])
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let mut sections = Vec::new();
        if !stdout.trim().is_empty() {
            sections.push("--- STDOUT ---".to_string());
            sections.push(stdout.trim_end().to_string());
        }
        if !stderr.trim().is_empty() {
            sections.push("--- STDERR ---".to_string());
            sections.push(stderr.trim_end().to_string());
        }
        sections.push(format!("--- EXIT CODE: {code} ---"));

        Ok(ToolOutput {
            content: sections.join("\n"),
            is_error: !output.status.success(),
        })
    }

    async fn preview(&self, name: &str, arguments: &serde_json::Value) -> Option<String> {
        let template = self.preview.as_deref()?;
        let command = match render_template(template, arguments) {
            Ok(command) => command,
            Err(e) => return Some(format!("Preview unavailable: {e}")),
        };
        debug!(tool = %name, command = %command, "Running preview command");

        let run = Command::new("bash")
            .args(["-c", &command])
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(PREVIEW_TIMEOUT, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Some(format!("Preview command: {command}\nPreview failed: {e}")),
            Err(_) => {
                warn!(tool = %name, "Preview command timed out");
                return Some(format!(
                    "Preview command: {command}\nPreview timed out after {}s",
                    PREVIEW_TIMEOUT.as_secs()
                ));
            }
        };

        let mut text = format!("Preview command: {command}");
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            text.push_str("\n--- PREVIEW OUTPUT ---\n");
            text.push_str(stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            text.push_str("\n--- PREVIEW STDERR ---\n");
            text.push_str(stderr.trim_end());
        }
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_named_placeholders() {
        let exec = CommandExecutor::new("git log -n {count} -- {path}");
        let rendered = exec
            .render(&serde_json::json!({"count": 5, "path": "src/main.rs"}))
            .unwrap();
        assert_eq!(rendered, "git log -n 5 -- src/main.rs");
    }

    #[test]
    fn doubled_braces_are_literal() {
        let exec = CommandExecutor::new("awk '{{print $1}}' {file}");
        let rendered = exec.render(&serde_json::json!({"file": "a.txt"})).unwrap();
        assert_eq!(rendered, "awk '{print $1}' a.txt");
    }

    #[test]
    fn missing_placeholder_value_is_invalid() {
        let exec = CommandExecutor::new("cat {path}");
        let err = exec.render(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(ref m) if m.contains("path")));
    }

    #[tokio::test]
    async fn output_has_sections_and_exit_code() {
        let exec = CommandExecutor::new("echo {word}; echo warn >&2");
        let output = exec
            .execute("say", &serde_json::json!({"word": "hi"}))
            .await
            .unwrap();
        assert!(!output.is_error);
        assert_eq!(
            output.content,
            "--- STDOUT ---\nhi\n--- STDERR ---\nwarn\n--- EXIT CODE: 0 ---"
        );
    }

    #[tokio::test]
    async fn preview_renders_and_runs_its_own_template() {
        let exec = CommandExecutor::new("rm {path}").with_preview(Some("echo would remove {path}".into()));
        let args = serde_json::json!({"path": "build.log"});

        let preview = exec.preview("clean", &args).await.unwrap();
        assert_eq!(
            preview,
            "Preview command: echo would remove build.log\n--- PREVIEW OUTPUT ---\nwould remove build.log"
        );
        assert_eq!(CommandExecutor::new("rm {path}").preview("clean", &args).await, None);
    }

    #[tokio::test]
    async fn failing_command_is_error() {
        let exec = CommandExecutor::new("exit 4");
        let output = exec.execute("fail", &serde_json::json!({})).await.unwrap();
        assert!(output.is_error);
        assert_eq!(output.content, "--- EXIT CODE: 4 ---");
    }
}
