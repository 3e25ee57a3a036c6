//! `read_file`: return the contents of a text file.

use std::sync::Arc;

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{Tool, ToolOutput, ToolSpec};

use crate::tracker::FileTracker;
use crate::{required_str, resolve_path};

#[derive(Default)]
pub struct FileReadTool {
    tracker: Arc<FileTracker>,
}

impl FileReadTool {
    pub fn new(tracker: Arc<FileTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads the content from a specified file path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file system path to read from."
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::internal(self.description(), self.parameters_schema()).with_auto_approved(true)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = resolve_path(required_str(&arguments, "path")?);

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                self.tracker.record(&path).await;
                Ok(ToolOutput::success(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ToolOutput::failure(
                format!("Error: File not found at '{}'.", path.display()),
            )),
            Err(e) => Ok(ToolOutput::failure(format!(
                "Error reading file '{}': {e}",
                path.display()
            ))),
        }
    }
}
