//! `ferrocode chat`: interactive or single-message session.

use std::io::Write;
use std::sync::{Arc, Mutex};

use ferrocode_agent::{
    AgentStreamEvent, ApprovalGate, ConversationLoop, ExecutionMode, LoopOptions,
    PipelineOptions, ToolExecutionPipeline, TurnReport, TurnStatus,
};
use ferrocode_core::event::EventBus;
use ferrocode_providers::{
    CancellableTransport, OpenAiCompatBackend, RetryController, RetryPolicy, TransportOptions,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::SessionArgs;
use crate::stats::{SessionStats, spawn_collector};
use crate::terminal::{self, EscListener, InputState, TerminalPrompter};

/// A `/command` typed at the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlashCommand {
    Plan,
    Build,
    Mode,
    Stats,
    Revoke,
    Yolo,
    Tools,
    Help,
    Quit,
}

impl SlashCommand {
    /// `None` for ordinary input, `Some(Err(..))` for an unknown command.
    fn parse(input: &str) -> Option<Result<Self, String>> {
        let command = input.strip_prefix('/')?.split_whitespace().next().unwrap_or("");
        Some(match command {
            "plan" => Ok(Self::Plan),
            "build" => Ok(Self::Build),
            "mode" => Ok(Self::Mode),
            "stats" => Ok(Self::Stats),
            "revoke" => Ok(Self::Revoke),
            "yolo" => Ok(Self::Yolo),
            "tools" => Ok(Self::Tools),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("Unknown command '/{other}'. Type /help for commands.")),
        })
    }
}

const HELP: &str = "Commands:
  /plan     Switch to plan mode (read-only tools)
  /build    Switch to build mode (all tools)
  /mode     Show the current mode
  /stats    Show session statistics
  /revoke   Forget approvals given for this session
  /yolo     Toggle approving every tool call
  /tools    List available tools
  /quit     Exit
Press ESC while the agent is working to cancel the request.";

struct Session {
    agent: ConversationLoop,
    input: Arc<InputState>,
    stats: Arc<Mutex<SessionStats>>,
    turn_done: mpsc::UnboundedReceiver<()>,
}

pub async fn run(args: &SessionArgs, message: Option<String>) -> anyhow::Result<()> {
    let config = super::load_config(args)?;
    if !config.has_api_key() {
        eprintln!("Note: no API key configured. Set OPENAI_API_KEY or api.api_key if the endpoint needs one.");
    }

    let bus = Arc::new(EventBus::default());
    let stats = spawn_collector(&bus);

    let backend = Arc::new(OpenAiCompatBackend::from_config(&config.api)?);
    let transport = CancellableTransport::new(backend, TransportOptions::from(&config.streaming))
        .with_event_bus(Arc::clone(&bus));
    let controller = RetryController::new(transport, RetryPolicy::from_config(&config.retry));

    let registry = Arc::new(super::load_registry(&config).await?);
    info!(tools = registry.len(), "Tool registry ready");

    let input = Arc::new(InputState::default());
    let gate = ApprovalGate::new(
        Arc::new(TerminalPrompter::new(Arc::clone(&input))),
        config.approval.yolo,
    );
    let pipeline = ToolExecutionPipeline::new(registry, gate, PipelineOptions::from(&config.tools))
        .with_event_bus(Arc::clone(&bus));

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (done_tx, turn_done) = mpsc::unbounded_channel();
    tokio::spawn(render(event_rx, done_tx, Arc::clone(&input)));

    let mode = if args.plan {
        ExecutionMode::Plan
    } else {
        ExecutionMode::Build
    };
    let agent = ConversationLoop::new(controller, pipeline, LoopOptions::from(&config))
        .with_events(event_tx)
        .with_mode(mode);

    let mut session = Session {
        agent,
        input,
        stats,
        turn_done,
    };

    match message {
        Some(message) => {
            let report = session.turn(&message).await;
            if let TurnStatus::Failed(error) = report.status {
                anyhow::bail!(error);
            }
        }
        None => {
            println!("ferrocode ({}, {} mode)", config.api.model, session.agent.mode());
            println!("Type /help for commands. Press ESC to cancel a request.\n");
            session.repl().await?;
            println!("\n{}", session.stats_report());
        }
    }
    Ok(())
}

impl Session {
    async fn turn(&mut self, message: &str) -> TurnReport {
        let cancel = CancellationToken::new();
        let listener = EscListener::start(cancel.clone(), Arc::clone(&self.input));
        let report = self.agent.run_turn(message, &cancel).await;
        listener.stop().await;
        // Let the renderer finish this turn's output before prompting again.
        let _ = self.turn_done.recv().await;
        report
    }

    async fn repl(&mut self) -> anyhow::Result<()> {
        loop {
            let prompt = match self.agent.mode() {
                ExecutionMode::Plan => "[plan] > ",
                ExecutionMode::Build => "> ",
            };
            print!("{prompt}");
            std::io::stdout().flush()?;

            let Some(line) = terminal::read_line().await? else {
                return Ok(());
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match SlashCommand::parse(line) {
                None => {
                    self.turn(line).await;
                }
                Some(Err(message)) => println!("{message}"),
                Some(Ok(SlashCommand::Quit)) => return Ok(()),
                Some(Ok(command)) => self.handle(command),
            }
        }
    }

    fn handle(&mut self, command: SlashCommand) {
        match command {
            SlashCommand::Plan => {
                self.agent.set_mode(ExecutionMode::Plan);
                println!("Plan mode: tools that change files are disabled.");
            }
            SlashCommand::Build => {
                self.agent.set_mode(ExecutionMode::Build);
                println!("Build mode: all tools are available.");
            }
            SlashCommand::Mode => println!("Current mode: {}", self.agent.mode()),
            SlashCommand::Stats => println!("{}", self.stats_report()),
            SlashCommand::Revoke => {
                let gate = self.agent.pipeline_mut().gate_mut();
                let count = gate.session_approvals();
                gate.revoke_all();
                println!("Revoked {count} session approval(s).");
            }
            SlashCommand::Yolo => {
                let gate = self.agent.pipeline_mut().gate_mut();
                let yolo = !gate.is_yolo();
                gate.set_yolo(yolo);
                println!("YOLO mode {}.", if yolo { "on" } else { "off" });
            }
            SlashCommand::Tools => {
                println!("{}", super::tools::tool_table(self.agent.pipeline().registry()));
            }
            SlashCommand::Help => println!("{HELP}"),
            SlashCommand::Quit => {}
        }
    }

    fn stats_report(&self) -> String {
        let messages = self.agent.conversation().len().saturating_sub(1);
        let stats = match self.stats.lock() {
            Ok(stats) => stats.report(),
            Err(_) => "Statistics unavailable".into(),
        };
        format!("{stats}\nMessages in history: {messages}")
    }
}

/// Print agent events as they arrive. Signals `turn_done` after each turn.
async fn render(
    mut events: mpsc::UnboundedReceiver<AgentStreamEvent>,
    turn_done: mpsc::UnboundedSender<()>,
    input: Arc<InputState>,
) {
    let mut mid_line = false;
    while let Some(event) = events.recv().await {
        let text = match &event {
            AgentStreamEvent::Chunk { content } => {
                mid_line = !content.ends_with('\n');
                content.clone()
            }
            AgentStreamEvent::Done { .. } => {
                let text = if mid_line { "\n".to_string() } else { String::new() };
                mid_line = false;
                write_out(&text, &input);
                let _ = turn_done.send(());
                continue;
            }
            other => {
                let line = event_line(other);
                let lead = if mid_line { "\n" } else { "" };
                mid_line = false;
                format!("{lead}{line}\n")
            }
        };
        write_out(&text, &input);
    }
}

fn write_out(text: &str, input: &InputState) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    // Raw mode turns off the terminal's newline translation.
    let _ = if input.is_raw() {
        stdout.write_all(text.replace('\n', "\r\n").as_bytes())
    } else {
        stdout.write_all(text.as_bytes())
    };
    let _ = stdout.flush();
}

/// One display line for a non-text event.
fn event_line(event: &AgentStreamEvent) -> String {
    match event {
        AgentStreamEvent::ToolCall { name, input, .. } => {
            format!("-> {name}({})", clip(&input.to_string(), 120))
        }
        AgentStreamEvent::ToolResult {
            name,
            output,
            success,
            ..
        } => {
            let mark = if *success { "ok" } else { "error" };
            let first = output.lines().next().unwrap_or("");
            format!("   {name} [{mark}] {}", clip(first, 160))
        }
        AgentStreamEvent::Retrying {
            attempt,
            delay_ms,
            reason,
            partial_output,
        } => {
            let mut line = format!(
                "[retry {attempt} in {:.1}s] {}",
                *delay_ms as f64 / 1000.0,
                clip(reason, 160)
            );
            if *partial_output {
                line.push_str("\n[the response will restart; ignore the partial text above]");
            }
            line
        }
        AgentStreamEvent::Warning { message } => format!("[warning] {message}"),
        AgentStreamEvent::Cancelled => "[cancelled]".to_string(),
        AgentStreamEvent::Error { message } => format!("[error] {message}"),
        AgentStreamEvent::Chunk { content } => content.clone(),
        AgentStreamEvent::Done { .. } => String::new(),
    }
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{head}...")
}
