//! `ferrocode config`: configuration management commands.

use std::path::Path;

use anyhow::Context;
use ferrocode_config::AppConfig;

use crate::SessionArgs;

pub fn show(args: &SessionArgs) -> anyhow::Result<()> {
    let config = super::load_config(args)?;
    println!("{config:#?}");
    match config.tool_definitions_path() {
        Some(path) => println!("\nTool definitions: {}", path.display()),
        None => println!("\nTool definitions: none"),
    }
    Ok(())
}

pub fn init() -> anyhow::Result<()> {
    let path = AppConfig::config_dir().join("config.toml");
    if write_default(&path)? {
        println!("Wrote default configuration to {}", path.display());
    } else {
        println!("Configuration already exists at {}", path.display());
    }
    Ok(())
}

/// Write the default config to `path` unless a file is already there.
fn write_default(path: &Path) -> anyhow::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

pub fn validate(args: &SessionArgs) -> anyhow::Result<()> {
    println!("Validating configuration...");
    let config = super::load_config(args)?;
    println!("  Config parsed and validated");

    if !config.has_api_key() {
        println!("  Warning: no API key set (OPENAI_API_KEY or api.api_key)");
    }

    if let Some(path) = config.tool_definitions_path() {
        let specs = ferrocode_config::load_tool_specs(&path)?;
        println!(
            "  Tool definitions: {} enabled entries in {}",
            specs.len(),
            path.display()
        );
    }

    println!();
    println!("  Endpoint:  {}", config.api.base_url);
    println!("  Model:     {}", config.api.model);
    println!(
        "  Streaming: {}",
        if config.streaming.enabled { "on" } else { "off" }
    );
    println!(
        "  Retries:   {}",
        if config.retry.enabled { "on" } else { "off" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_default_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default(&path).unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        let parsed = AppConfig::load_from(&path).unwrap();
        assert!(written.contains("[api]"));
        assert_eq!(parsed.api.model, AppConfig::default().api.model);

        assert!(!write_default(&path).unwrap());
    }
}
