//! ferrocode CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive session or single-message mode (default)
//! - `tools`: List the tools the agent can call
//! - `config`: Show, initialize or validate configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod stats;
mod terminal;

#[derive(Parser)]
#[command(
    name = "ferrocode",
    about = "ferrocode: a terminal coding agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    session: SessionArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

/// Options shared by every command that builds a session.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct SessionArgs {
    /// Config file (defaults to ~/.ferrocode/config.toml)
    #[arg(long, global = true, env = "FERROCODE_CONFIG")]
    pub config: Option<PathBuf>,

    /// External tool definitions file
    #[arg(long, global = true)]
    pub tools_file: Option<PathBuf>,

    /// Start in plan mode (read-only tools)
    #[arg(long, global = true)]
    pub plan: bool,

    /// Approve every tool call without asking
    #[arg(long, global = true)]
    pub yolo: bool,

    /// Request complete responses instead of streams
    #[arg(long, global = true)]
    pub no_stream: bool,

    /// Override the model
    #[arg(long, global = true)]
    pub model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List available tools
    Tools,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Write a default config file if none exists
    Init,
    /// Check the configuration and tool definitions
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with the assistant's output.
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    match cli.command.unwrap_or(Commands::Chat { message: None }) {
        Commands::Chat { message } => commands::chat::run(&cli.session, message).await?,
        Commands::Tools => commands::tools::run(&cli.session).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&cli.session)?,
            ConfigAction::Init => commands::config_cmd::init()?,
            ConfigAction::Validate => commands::config_cmd::validate(&cli.session)?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_is_chat() {
        let cli = Cli::try_parse_from(["ferrocode", "--plan", "--yolo"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.session.plan);
        assert!(cli.session.yolo);
    }

    #[test]
    fn chat_message_and_global_flags() {
        let cli = Cli::try_parse_from([
            "ferrocode",
            "chat",
            "-m",
            "hello",
            "--no-stream",
            "--tools-file",
            "tools.json",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Chat { message }) => assert_eq!(message.as_deref(), Some("hello")),
            _ => panic!("expected chat"),
        }
        assert!(cli.session.no_stream);
        assert_eq!(cli.session.tools_file, Some(PathBuf::from("tools.json")));
    }

    #[test]
    fn config_subcommands_parse() {
        let cli = Cli::try_parse_from(["ferrocode", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Validate
            })
        ));
    }
}
