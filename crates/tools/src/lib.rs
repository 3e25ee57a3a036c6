//! Tools for ferrocode.
//!
//! Built-in tools let the agent inspect and change the workspace: read, write
//! and edit files, list directories, search, and run shell commands. External
//! tools come from a JSON definitions file and run as shell command templates,
//! JSON-RPC endpoints or MCP stdio servers.
//!
//! Both are exposed as [`ToolSource`]s. Register [`BuiltinTools`] first and
//! [`ExternalTools`] second so definitions can override built-ins.

pub mod command;
pub mod file_edit;
pub mod file_read;
pub mod file_write;
pub mod jsonrpc;
pub mod list_dir;
pub mod mcp_stdio;
pub mod pwd;
pub mod search;
pub mod shell;
pub mod tracker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ferrocode_config::{AppConfig, ConfigError, ToolsConfig};
use ferrocode_core::error::ToolError;
use ferrocode_core::tool::{ToolKind, ToolRegistry, ToolSource, ToolSpec};
use tracing::{info, warn};

pub use command::CommandExecutor;
pub use jsonrpc::JsonRpcExecutor;
pub use mcp_stdio::{McpServer, McpToolExecutor};
pub use shell::{main_command, risky_pattern};
pub use tracker::FileTracker;

/// The in-process tools.
pub struct BuiltinTools {
    shell_timeout_secs: u64,
}

impl BuiltinTools {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            shell_timeout_secs: config.shell_timeout_secs,
        }
    }
}

impl Default for BuiltinTools {
    fn default() -> Self {
        Self::new(&ToolsConfig::default())
    }
}

#[async_trait]
impl ToolSource for BuiltinTools {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn register(&self, registry: &mut ToolRegistry) -> Result<usize, ToolError> {
        let tracker = Arc::new(FileTracker::default());
        registry.register_tool(Box::new(file_read::FileReadTool::new(tracker.clone())));
        registry.register_tool(Box::new(file_write::FileWriteTool::new(tracker.clone())));
        registry.register_tool(Box::new(file_edit::FileEditTool::new(tracker)));
        registry.register_tool(Box::new(list_dir::ListDirectoryTool));
        registry.register_tool(Box::new(search::GrepTool));
        registry.register_tool(Box::new(search::GlobTool));
        registry.register_tool(Box::new(pwd::PwdTool));
        registry.register_tool(Box::new(shell::ShellTool::new(self.shell_timeout_secs)));
        Ok(8)
    }
}

/// Tools declared in a definitions file.
///
/// An `internal` entry adjusts the policy of an already registered tool and
/// keeps its executor. An `mcp-stdio` entry with a `command` is a server: its
/// tools are discovered at registration and inherit the entry's policy. An
/// `mcp-stdio` entry with a `server` binds one tool to such a server.
pub struct ExternalTools {
    specs: BTreeMap<String, ToolSpec>,
    discovery_timeout: Duration,
    http: reqwest::Client,
}

impl ExternalTools {
    pub fn new(specs: BTreeMap<String, ToolSpec>, config: &ToolsConfig) -> Self {
        Self {
            specs,
            discovery_timeout: Duration::from_secs(config.timeouts.mcp_stdio_secs.max(1)),
            http: reqwest::Client::new(),
        }
    }

    /// Load the definitions file named by the config, if one exists.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let specs = match config.tool_definitions_path() {
            Some(path) => {
                info!(path = %path.display(), "Loading tool definitions");
                ferrocode_config::load_tool_specs(&path)?
            }
            None => BTreeMap::new(),
        };
        Ok(Self::new(specs, &config.tools))
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    async fn register_server(
        &self,
        registry: &mut ToolRegistry,
        name: &str,
        entry: &ToolSpec,
        server: &Arc<McpServer>,
    ) -> usize {
        let discovered =
            match tokio::time::timeout(self.discovery_timeout, server.discover_tools()).await {
                Ok(Ok(tools)) => tools,
                Ok(Err(e)) => {
                    warn!(server = %name, error = %e, "MCP tool discovery failed, skipping server");
                    return 0;
                }
                Err(_) => {
                    warn!(server = %name, "MCP tool discovery timed out, skipping server");
                    return 0;
                }
            };

        let mut count = 0;
        for tool in discovered {
            let mut spec = entry.clone();
            spec.description = tool.description;
            spec.parameters = tool.input_schema;
            spec.command = None;
            spec.server = Some(name.to_string());
            registry.register(
                tool.name,
                spec,
                Arc::new(McpToolExecutor::new(Arc::clone(server))),
            );
            count += 1;
        }
        info!(server = %name, tools = count, "Registered MCP server tools");
        count
    }
}

#[async_trait]
impl ToolSource for ExternalTools {
    fn name(&self) -> &str {
        "external"
    }

    async fn register(&self, registry: &mut ToolRegistry) -> Result<usize, ToolError> {
        let mut servers: BTreeMap<&str, Arc<McpServer>> = BTreeMap::new();
        let mut count = 0;

        // Servers first so single-tool entries can refer to them.
        for (name, entry) in &self.specs {
            if entry.kind != ToolKind::McpStdio || entry.server.is_some() {
                continue;
            }
            let Some(command) = entry.command.as_deref() else {
                warn!(tool = %name, "mcp-stdio entry has neither command nor server, skipping");
                continue;
            };
            let server = Arc::new(McpServer::new(name.as_str(), command));
            count += self.register_server(registry, name, entry, &server).await;
            servers.insert(name.as_str(), server);
        }

        for (name, entry) in &self.specs {
            match entry.kind {
                ToolKind::Internal => {
                    let Some(existing) = registry.get(name) else {
                        warn!(tool = %name, "No built-in tool to override, skipping");
                        continue;
                    };
                    let mut spec = entry.clone();
                    if spec.description.is_empty() {
                        spec.description = existing.spec.description.clone();
                        spec.parameters = existing.spec.parameters.clone();
                    }
                    if spec.timeout_secs.is_none() {
                        spec.timeout_secs = existing.spec.timeout_secs;
                    }
                    let executor = Arc::clone(&existing.executor);
                    registry.register(name.as_str(), spec, executor);
                }
                ToolKind::Command => {
                    let Some(template) = entry.command.as_deref() else {
                        warn!(tool = %name, "command entry has no command template, skipping");
                        continue;
                    };
                    registry.register(
                        name.as_str(),
                        entry.clone(),
                        Arc::new(
                            CommandExecutor::new(template)
                                .with_preview(entry.preview_command.clone()),
                        ),
                    );
                }
                ToolKind::JsonRpc => {
                    let Some(url) = entry.url.as_deref() else {
                        warn!(tool = %name, "jsonrpc entry has no url, skipping");
                        continue;
                    };
                    registry.register(
                        name.as_str(),
                        entry.clone(),
                        Arc::new(JsonRpcExecutor::new(
                            self.http.clone(),
                            url,
                            entry.method.clone(),
                        )),
                    );
                }
                ToolKind::McpStdio => {
                    let Some(server_name) = entry.server.as_deref() else {
                        continue;
                    };
                    let Some(server) = servers.get(server_name) else {
                        warn!(tool = %name, server = %server_name, "Unknown MCP server, skipping");
                        continue;
                    };
                    registry.register(
                        name.as_str(),
                        entry.clone(),
                        Arc::new(McpToolExecutor::new(Arc::clone(server))),
                    );
                }
            }
            count += 1;
        }

        Ok(count)
    }
}

/// Apply `sources` in order to a fresh registry. A failing source is logged
/// and skipped.
pub async fn build_registry(sources: &[&dyn ToolSource]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for source in sources {
        match source.register(&mut registry).await {
            Ok(count) => info!(source = %source.name(), count, "Registered tools"),
            Err(e) => warn!(source = %source.name(), error = %e, "Tool source failed"),
        }
    }
    registry
}

pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' parameter")))
}

pub(crate) fn resolve_path(path: &str) -> PathBuf {
    let path = Path::new(path);
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

pub(crate) fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Run a directory walk off the async runtime.
pub(crate) async fn spawn_walk<T, F>(tool: &str, walk: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(walk)
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: tool.to_string(),
            reason: e.to_string(),
        })
}
