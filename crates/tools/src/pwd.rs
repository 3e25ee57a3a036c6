use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{Tool, ToolOutput, ToolSpec};

/// `pwd`: the agent's working directory.
pub struct PwdTool;

#[async_trait]
impl Tool for PwdTool {
    fn name(&self) -> &str {
        "pwd"
    }

    fn description(&self) -> &str {
        "Returns the current working directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::internal(self.description(), self.parameters_schema()).with_auto_approved(true)
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        match std::env::current_dir() {
            Ok(dir) => Ok(ToolOutput::success(dir.display().to_string())),
            Err(e) => Ok(ToolOutput::failure(format!(
                "Error getting current directory: {e}"
            ))),
        }
    }
}
