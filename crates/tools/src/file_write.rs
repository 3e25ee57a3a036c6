//! `write_file`: create or overwrite a file, creating parent directories.
//! An existing file that changed since the agent last read it is left alone.

use std::sync::Arc;

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{Tool, ToolOutput, ToolSpec};

use crate::tracker::{FileTracker, ReadRequirement};
use crate::{required_str, resolve_path};

#[derive(Default)]
pub struct FileWriteTool {
    tracker: Arc<FileTracker>,
}

impl FileWriteTool {
    pub fn new(tracker: Arc<FileTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes content to a specified file path, creating directories if needed. \
         Use for new files and complete rewrites; prefer edit_file for small changes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file system path where the content should be written."
                },
                "content": {
                    "type": "string",
                    "description": "The content to write into the file."
                }
            },
            "required": ["path", "content"]
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::internal(self.description(), self.parameters_schema())
            .with_plan_mode(false)
            .with_approval_excludes_arguments(true)
            .with_approval_key_exclude(&["content"])
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = resolve_path(required_str(&arguments, "path")?);
        let content = required_str(&arguments, "content")?;

        if let Some(error) = self.tracker.check(&path, ReadRequirement::IfRead).await {
            return Ok(ToolOutput::failure(error));
        }
        let previous = tokio::fs::read_to_string(&path).await.ok();

        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolOutput::failure(format!(
                "Error creating directory '{}': {e}",
                parent.display()
            )));
        }

        if let Err(e) = tokio::fs::write(&path, content).await {
            return Ok(ToolOutput::failure(format!(
                "Error writing to file '{}': {e}",
                path.display()
            )));
        }

        self.tracker.record(&path).await;

        let chars = content.chars().count();
        let message = match previous {
            None => format!("Successfully created '{}' ({chars} characters).", path.display()),
            Some(old) if old == content => format!("File '{}' unchanged.", path.display()),
            Some(_) => format!("Successfully updated '{}' ({chars} characters).", path.display()),
        };
        Ok(ToolOutput::success(message))
    }
}
