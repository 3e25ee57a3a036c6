//! `list_directory`: recursive file listing, capped at [`FILE_LIMIT`] entries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{Tool, ToolOutput, ToolSpec};
use walkdir::WalkDir;

use crate::{is_hidden, spawn_walk};

pub const FILE_LIMIT: usize = 2000;

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "Lists the contents of a specified directory recursively (limited to 2000 files)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the directory."
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
        let path = match arguments["path"].as_str() {
            Some("") | None => ".".to_string(),
            Some(p) => p.to_string(),
        };
        let root = PathBuf::from(&path);

        if !root.exists() {
            return Ok(ToolOutput::failure(format!(
                "Error: Directory not found at '{path}'."
            )));
        }
        if !root.is_dir() {
            return Ok(ToolOutput::failure(format!(
                "Error: Path '{path}' is not a directory."
            )));
        }

        let files = spawn_walk("list_directory", move || list_files(&root, FILE_LIMIT)).await?;
        if files.is_empty() {
            return Ok(ToolOutput::success("No files found"));
        }

        let mut output = files.join("\n");
        if files.len() >= FILE_LIMIT {
            output.push_str(&format!("\n... (showing first {FILE_LIMIT} files)"));
        }
        Ok(ToolOutput::success(output))
    }
}

/// Files under `root`, relative to it, skipping hidden entries.
fn list_files(root: &Path, limit: usize) -> Vec<String> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .take(limit)
        .collect()
}
