//! `mcp-stdio` tools: a subprocess speaking line-delimited JSON-RPC 2.0.
//!
//! [`McpServer`] owns one child process, started lazily on first use with the
//! `initialize` handshake. Requests are serialized through a mutex so replies
//! are read in order; lines that are not the awaited reply (server
//! notifications, log noise) are skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{ToolExecutor, ToolOutput};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// A tool advertised by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

struct Connection {
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct McpServer {
    name: String,
    command_line: String,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl McpServer {
    pub fn new(name: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_line: command_line.into(),
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn failure(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: format!("mcp:{}", self.name),
            reason: reason.into(),
        }
    }

    /// Run `tools/list`, starting the server if needed.
    pub async fn discover_tools(&self) -> Result<Vec<McpToolDefinition>, ToolError> {
        let response = self.request("tools/list", serde_json::json!({})).await?;
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(self.failure(format!("tools/list failed: {error}")));
        }
        let tools = response
            .pointer("/result/tools")
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        serde_json::from_value(tools)
            .map_err(|e| self.failure(format!("invalid tools/list result: {e}")))
    }

    /// Run `tools/call`. The JSON `result` becomes the tool output.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let response = self
            .request(
                "tools/call",
                serde_json::json!({ "name": tool, "arguments": arguments }),
            )
            .await?;

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Ok(ToolOutput::failure(error.to_string()));
        }
        let Some(result) = response.get("result") else {
            return Ok(ToolOutput::failure(format!("Tool call failed: {response}")));
        };
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(ToolOutput {
            content: result.to_string(),
            is_error,
        })
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.start().await?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(self.failure("server not running"));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let result = self.exchange(connection, id, method, params).await;
        if result.is_err() {
            // Start fresh on the next call.
            *guard = None;
        }
        result
    }

    async fn start(&self) -> Result<Connection, ToolError> {
        info!(server = %self.name, command = %self.command_line, "Starting MCP server");
        let mut child = Command::new("bash")
            .args(["-c", &self.command_line])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failure(format!("failed to start: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure("no stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.failure("no stdout handle"))?;
        let mut connection = Connection {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "ferrocode", "version": env!("CARGO_PKG_VERSION") },
        });
        let response = self
            .exchange(&mut connection, id, "initialize", params)
            .await?;
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(self.failure(format!("initialize rejected: {error}")));
        }
        self.send(
            &mut connection,
            &serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await?;
        debug!(server = %self.name, "MCP server initialized");
        Ok(connection)
    }

    async fn send(
        &self,
        connection: &mut Connection,
        message: &serde_json::Value,
    ) -> Result<(), ToolError> {
        let mut line = message.to_string();
        line.push('\n');
        connection
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.failure(format!("write failed: {e}")))?;
        connection
            .stdin
            .flush()
            .await
            .map_err(|e| self.failure(format!("flush failed: {e}")))
    }

    async fn exchange(
        &self,
        connection: &mut Connection,
        id: u64,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.send(connection, &request).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = connection
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| self.failure(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(self.failure("server closed its output"));
            }
            let Ok(message) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                warn!(server = %self.name, line = %line.trim(), "Skipping non-JSON line from MCP server");
                continue;
            };
            if message.get("id").and_then(|v| v.as_u64()) == Some(id) {
                return Ok(message);
            }
            debug!(server = %self.name, "Skipping unrelated MCP message");
        }
    }
}

/// Routes a registered tool to the server hosting it.
pub struct McpToolExecutor {
    server: Arc<McpServer>,
}

impl McpToolExecutor {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        debug!(tool = %name, server = %self.server.name(), "Executing MCP tool");
        self.server.call_tool(name, arguments).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    /// A shell script that answers initialize (id 1), tools/list (id 2) and
    /// one tools/call (id 3), ignoring the initialized notification.
    pub(crate) fn scripted_server() -> String {
        [
            "read l; echo '{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{}}}'",
            "read l",
            "read l; echo 'server log line'; echo '{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"tools\":[{\"name\":\"weather\",\"description\":\"Current weather\",\"inputSchema\":{\"type\":\"object\",\"properties\":{\"city\":{\"type\":\"string\"}},\"required\":[\"city\"]}}]}}'",
            "read l; echo '{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"sunny\"}]}}'",
        ]
        .join("; ")
    }
}
