pub mod chat;
pub mod config_cmd;
pub mod tools;

use anyhow::Context;
use ferrocode_config::AppConfig;
use ferrocode_core::tool::ToolRegistry;
use ferrocode_tools::{BuiltinTools, ExternalTools, build_registry};

use crate::SessionArgs;

/// Load the configuration and apply command-line overrides on top of the
/// file and environment.
pub fn load_config(args: &SessionArgs) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => AppConfig::load()?,
    };
    apply_args(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_args(config: &mut AppConfig, args: &SessionArgs) {
    if let Some(path) = &args.tools_file {
        config.tools.definitions_file = Some(path.clone());
    }
    if let Some(model) = &args.model {
        config.api.model = model.clone();
    }
    if args.yolo {
        config.approval.yolo = true;
    }
    if args.no_stream {
        config.streaming.enabled = false;
    }
}

/// Built-in tools plus the definitions file, in that order.
pub async fn load_registry(config: &AppConfig) -> anyhow::Result<ToolRegistry> {
    let builtin = BuiltinTools::new(&config.tools);
    let external = ExternalTools::from_config(config).context("Failed to load tool definitions")?;
    Ok(build_registry(&[&builtin, &external]).await)
}
