//! Read-only search tools: `grep` (content search) and `glob` (path matching).
//!
//! Both walk the tree with `walkdir`, skip hidden entries and cap their output
//! so a huge repository cannot flood the conversation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{Tool, ToolOutput, ToolSpec};
use globset::{GlobBuilder, GlobMatcher};
use regex_lite::Regex;
use walkdir::WalkDir;

use crate::{is_hidden, spawn_walk};

pub const LINE_LIMIT: usize = 2000;
pub const FILE_LIMIT: usize = 2000;

/// Bytes inspected for a NUL when deciding a file is binary.
const BINARY_SNIFF_LEN: usize = 8192;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search text in files. Path defaults to current directory. Returns max 2000 lines."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text or regular expression to search for in files."
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search in (default: current directory)."
                }
            },
            "required": ["text"],
            "additionalProperties": false
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::internal(self.description(), self.parameters_schema()).with_auto_approved(true)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let text = arguments["text"].as_str().unwrap_or_default();
        if text.is_empty() {
            return Ok(ToolOutput::failure("Error: Search text cannot be empty."));
        }
        let path = match arguments["path"].as_str() {
            Some("") | None => ".".to_string(),
            Some(p) => p.to_string(),
        };
        let root = PathBuf::from(&path);
        if !root.exists() {
            return Ok(ToolOutput::failure(format!(
                "Error: Path '{path}' does not exist."
            )));
        }

        let pattern = match compile_pattern(text) {
            Ok(pattern) => pattern,
            Err(e) => {
                return Ok(ToolOutput::failure(format!(
                    "Error searching for '{text}': {e}"
                )));
            }
        };
        let lines = spawn_walk("grep", move || search_tree(&root, &pattern, LINE_LIMIT)).await?;
        if lines.is_empty() {
            return Ok(ToolOutput::success("No matches found"));
        }

        let mut output = lines.join("\n");
        if lines.len() >= LINE_LIMIT {
            output.push_str(&format!("\n... (showing first {LINE_LIMIT} lines)"));
        }
        Ok(ToolOutput::success(output))
    }
}

/// Treat the search text as a regex, or literally when it does not compile.
fn compile_pattern(text: &str) -> Result<Regex, regex_lite::Error> {
    Regex::new(text).or_else(|_| Regex::new(&regex_lite::escape(text)))
}

/// `path:line:text` for every matching line under `root`.
fn search_tree(root: &Path, pattern: &Regex, limit: usize) -> Vec<String> {
    let mut matches = Vec::new();
    let files = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file());

    for entry in files {
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        if bytes[..bytes.len().min(BINARY_SNIFF_LEN)].contains(&0) {
            continue;
        }
        let Ok(content) = String::from_utf8(bytes) else {
            continue;
        };
        let display = entry.path().strip_prefix("./").unwrap_or(entry.path()).display();
        for (number, line) in content.lines().enumerate() {
            if pattern.is_match(line) {
                matches.push(format!("{display}:{}:{line}", number + 1));
                if matches.len() >= limit {
                    return matches;
                }
            }
        }
    }
    matches
}

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a pattern. Supports ** for recursive matching. Returns max 2000 files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Pattern to search for (e.g., '*.rs', 'test_*', '**/*.rs', 'crates/**/*.toml'). Supports ** for recursive directory matching."
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::internal(self.description(), self.parameters_schema()).with_auto_approved(true)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let pattern = arguments["pattern"].as_str().unwrap_or_default();
        if pattern.is_empty() {
            return Ok(ToolOutput::failure("Error: Pattern cannot be empty."));
        }

        let matcher = match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => glob.compile_matcher(),
            Err(e) => {
                return Ok(ToolOutput::failure(format!(
                    "Error: Invalid pattern '{pattern}': {e}"
                )));
            }
        };
        // Like ripgrep's --glob, a pattern without a separator matches at any depth.
        let match_name_only = !pattern.contains('/');

        let files = spawn_walk("glob", move || {
            glob_tree(Path::new("."), &matcher, match_name_only, FILE_LIMIT)
        })
        .await?;
        if files.is_empty() {
            return Ok(ToolOutput::success("No files found matching pattern"));
        }

        let mut output = files.join("\n");
        if files.len() >= FILE_LIMIT {
            output.push_str(&format!("\n... (showing first {FILE_LIMIT} files)"));
        }
        Ok(ToolOutput::success(output))
    }
}

fn glob_tree(root: &Path, matcher: &GlobMatcher, name_only: bool, limit: usize) -> Vec<String> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?.to_path_buf();
            let candidate = if name_only {
                PathBuf::from(relative.file_name()?)
            } else {
                relative.clone()
            };
            matcher
                .is_match(&candidate)
                .then(|| relative.to_string_lossy().into_owned())
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("README.md"), "hello world\n").unwrap();
        std::fs::write(
            dir.path().join("src/lib.rs"),
            "pub fn hello() {}\nfn other() {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("src/nested/deep.rs"), "// hello again\n").unwrap();
        std::fs::write(dir.path().join("blob.bin"), b"hello\0binary").unwrap();
        dir
    }

    #[tokio::test]
    async fn grep_reports_path_line_and_text() {
        let dir = fixture();
        let output = GrepTool
            .execute(serde_json::json!({
                "text": "fn hello",
                "path": dir.path().to_str().unwrap()
            }))
            .await
            .unwrap();
        assert!(!output.is_error);
        assert_eq!(output.content.lines().count(), 1);
        assert!(output.content.ends_with("lib.rs:1:pub fn hello() {}"));
    }

    #[tokio::test]
    async fn grep_skips_binary_files() {
        let dir = fixture();
        let output = GrepTool
            .execute(serde_json::json!({
                "text": "hello",
                "path": dir.path().to_str().unwrap()
            }))
            .await
            .unwrap();
        assert_eq!(output.content.lines().count(), 3);
        assert!(!output.content.contains("blob.bin"));
    }

    #[tokio::test]
    async fn grep_falls_back_to_literal_for_bad_regex() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "call foo(bar\n").unwrap();
        let output = GrepTool
            .execute(serde_json::json!({
                "text": "foo(",
                "path": dir.path().to_str().unwrap()
            }))
            .await
            .unwrap();
        assert!(output.content.contains("a.txt:1:call foo(bar"));
    }

    #[tokio::test]
    async fn grep_validates_input() {
        let output = GrepTool.execute(serde_json::json!({"text": ""})).await.unwrap();
        assert!(output.is_error);

        let output = GrepTool
            .execute(serde_json::json!({"text": "x", "path": "/definitely/not/here"}))
            .await
            .unwrap();
        assert!(output.content.contains("does not exist"));
    }

    #[test]
    fn glob_matches_names_at_any_depth() {
        let dir = fixture();
        let matcher = GlobBuilder::new("*.rs")
            .literal_separator(true)
            .build()
            .unwrap()
            .compile_matcher();
        let files = glob_tree(dir.path(), &matcher, true, FILE_LIMIT);
        assert_eq!(files, vec!["src/lib.rs", "src/nested/deep.rs"]);
    }

    #[test]
    fn glob_with_separator_matches_relative_paths() {
        let dir = fixture();
        let matcher = GlobBuilder::new("src/*.rs")
            .literal_separator(true)
            .build()
            .unwrap()
            .compile_matcher();
        assert_eq!(
            glob_tree(dir.path(), &matcher, false, FILE_LIMIT),
            vec!["src/lib.rs"]
        );

        let matcher = GlobBuilder::new("src/**/*.rs")
            .literal_separator(true)
            .build()
            .unwrap()
            .compile_matcher();
        assert_eq!(glob_tree(dir.path(), &matcher, false, FILE_LIMIT).len(), 2);
    }

    #[tokio::test]
    async fn glob_rejects_empty_pattern() {
        let output = GlobTool.execute(serde_json::json!({"pattern": ""})).await.unwrap();
        assert!(output.is_error);
    }
}
