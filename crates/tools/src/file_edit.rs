//! `edit_file`: replace one unique occurrence of text in a file.
//!
//! An empty `old_string` creates a new file; an empty `new_string` deletes the
//! matched text. The match must be exact and unique, and the file must have
//! been read (and not changed since) before it is edited.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{Tool, ToolOutput, ToolSpec};

use crate::tracker::{FileTracker, ReadRequirement};
use crate::{required_str, resolve_path};

#[derive(Default)]
pub struct FileEditTool {
    tracker: Arc<FileTracker>,
}

impl FileEditTool {
    pub fn new(tracker: Arc<FileTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edits a file by replacing one exact, unique occurrence of old_string with new_string. \
         Leave old_string empty to create a new file; leave new_string empty to delete text. \
         Read the file first: the match must include whitespace and indentation exactly."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "The text to replace (must be unique within the file)"
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement text"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::internal(self.description(), self.parameters_schema())
            .with_plan_mode(false)
            .with_approval_excludes_arguments(true)
            .with_approval_key_exclude(&["old_string", "new_string"])
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = resolve_path(required_str(&arguments, "file_path")?);
        let old_string = required_str(&arguments, "old_string")?;
        let new_string = required_str(&arguments, "new_string")?;

        if old_string.is_empty() {
            let output = create_file(&path, new_string).await;
            if !output.is_error {
                self.tracker.record(&path).await;
            }
            return Ok(output);
        }

        if path.is_dir() {
            return Ok(ToolOutput::failure(format!(
                "Error: Path is a directory, not a file: {}",
                path.display()
            )));
        }
        if let Some(error) = self.tracker.check(&path, ReadRequirement::Always).await {
            return Ok(ToolOutput::failure(error));
        }
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolOutput::failure(format!(
                    "Error: File not found: {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Ok(ToolOutput::failure(format!(
                    "Error reading file '{}': {e}",
                    path.display()
                )));
            }
        };

        match current.matches(old_string).count() {
            0 => {
                return Ok(ToolOutput::failure(
                    "Error: old_string not found in file. Make sure it matches exactly, \
                     including whitespace and line breaks",
                ));
            }
            1 => {}
            n => {
                return Ok(ToolOutput::failure(format!(
                    "Error: old_string matches {n} locations. Include more surrounding \
                     context so it identifies exactly one"
                )));
            }
        }

        let updated = current.replacen(old_string, new_string, 1);
        if let Err(e) = tokio::fs::write(&path, &updated).await {
            return Ok(ToolOutput::failure(format!(
                "Error writing to file '{}': {e}",
                path.display()
            )));
        }

        self.tracker.record(&path).await;

        let verb = if new_string.is_empty() {
            "Deleted content from"
        } else {
            "Successfully edited"
        };
        Ok(ToolOutput::success(format!(
            "{verb} '{}' ({} -> {} characters).",
            path.display(),
            current.chars().count(),
            updated.chars().count()
        )))
    }
}

async fn create_file(path: &Path, content: &str) -> ToolOutput {
    if path.exists() {
        return ToolOutput::failure(format!("Error: File already exists: {}", path.display()));
    }
    if let Some(parent) = path.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        return ToolOutput::failure(format!(
            "Error creating directory '{}': {e}",
            parent.display()
        ));
    }
    match tokio::fs::write(path, content).await {
        Ok(()) => ToolOutput::success(format!(
            "Successfully created '{}' ({} characters).",
            path.display(),
            content.chars().count()
        )),
        Err(e) => ToolOutput::failure(format!(
            "Error creating file '{}': {e}",
            path.display()
        )),
    }
}
