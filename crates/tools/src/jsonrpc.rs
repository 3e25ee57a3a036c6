//! Executor for `jsonrpc` tools: one JSON-RPC 2.0 request per call over HTTP.

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{ToolExecutor, ToolOutput};
use tracing::debug;

pub struct JsonRpcExecutor {
    client: reqwest::Client,
    url: String,
    method: Option<String>,
}

impl JsonRpcExecutor {
    /// `method` defaults to the tool name when absent.
    pub fn new(client: reqwest::Client, url: impl Into<String>, method: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            method,
        }
    }
}

#[async_trait]
impl ToolExecutor for JsonRpcExecutor {
    async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let method = self.method.as_deref().unwrap_or(name);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": arguments,
            "id": 1,
        });
        debug!(tool = %name, url = %self.url, method = %method, "Executing JSON-RPC call");

        let response = match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(ToolOutput::failure(format!(
                    "Error executing JSON-RPC tool '{name}': {e}"
                )));
            }
        };
        let status = response.status();
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                return Ok(ToolOutput::failure(format!(
                    "Error executing JSON-RPC tool '{name}': HTTP {status}: {e}"
                )));
            }
        };

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Ok(ToolOutput::failure(error.to_string()));
        }
        match body.get("result") {
            Some(serde_json::Value::String(text)) => Ok(ToolOutput::success(text.clone())),
            Some(other) => Ok(ToolOutput::success(other.to_string())),
            None => Ok(ToolOutput::success("null")),
        }
    }
}
