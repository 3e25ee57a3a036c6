//! `ferrocode tools`: list the tools the agent can call.

use ferrocode_core::tool::{ToolKind, ToolRegistry};

use crate::SessionArgs;

pub async fn run(args: &SessionArgs) -> anyhow::Result<()> {
    let config = super::load_config(args)?;
    let registry = super::load_registry(&config).await?;
    println!("{}", tool_table(&registry));
    Ok(())
}

fn kind_label(kind: ToolKind) -> &'static str {
    match kind {
        ToolKind::Internal => "internal",
        ToolKind::Command => "command",
        ToolKind::JsonRpc => "jsonrpc",
        ToolKind::McpStdio => "mcp-stdio",
    }
}

/// One line per tool: name, kind, approval and plan-mode policy.
pub fn tool_table(registry: &ToolRegistry) -> String {
    let mut out = format!(
        "{:<24} {:<10} {:<9} {}\n",
        "Tool", "Kind", "Approval", "Plan mode"
    );
    for name in registry.names() {
        let Some(tool) = registry.get(name) else {
            continue;
        };
        let spec = &tool.spec;
        out.push_str(&format!(
            "{:<24} {:<10} {:<9} {}\n",
            name,
            kind_label(spec.kind),
            if spec.auto_approved { "auto" } else { "prompt" },
            if spec.available_in_plan_mode {
                "yes"
            } else {
                "no"
            },
        ));
    }
    out.push_str(&format!("\n{} tools", registry.len()));
    out
}
