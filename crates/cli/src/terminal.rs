//! Terminal input: line reading, the ESC listener and the approval prompt.
//!
//! While a turn runs, a blocking task keeps the terminal in raw mode and
//! cancels the turn's token on a lone ESC. The approval prompt needs normal
//! line input, so it pauses the listener (which leaves raw mode) for as long
//! as it reads.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use ferrocode_agent::{ApprovalChoice, ApprovalPrompter, ApprovalReply, ApprovalRequest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_PROMPT_ATTEMPTS: usize = 3;

/// Read one line from stdin off the runtime. `None` on end of input.
pub async fn read_line() -> io::Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
        }
    })
    .await
    .map_err(io::Error::other)?
}

pub fn is_interactive() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

/// Coordination between the listener and prompts that need cooked input.
#[derive(Debug, Default)]
pub struct InputState {
    paused: AtomicBool,
    raw: AtomicBool,
}

impl InputState {
    /// Whether the terminal is currently in raw mode.
    pub fn is_raw(&self) -> bool {
        self.raw.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        while self.is_raw() {
            tokio::time::sleep(POLL_INTERVAL / 2).await;
        }
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

/// Watches for ESC during one turn.
pub struct EscListener {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EscListener {
    /// Start listening; ESC cancels `cancel`. Does nothing without a terminal.
    pub fn start(cancel: CancellationToken, input: Arc<InputState>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        if !is_interactive() {
            return Self { stop, handle: None };
        }

        let flag = Arc::clone(&stop);
        let handle = tokio::task::spawn_blocking(move || {
            if let Err(e) = listen(&cancel, &input, &flag) {
                warn!(error = %e, "ESC listener stopped");
            }
            if input.is_raw() {
                let _ = terminal::disable_raw_mode();
                input.raw.store(false, Ordering::SeqCst);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop listening and restore the terminal.
    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn listen(cancel: &CancellationToken, input: &InputState, stop: &AtomicBool) -> io::Result<()> {
    while !stop.load(Ordering::SeqCst) && !cancel.is_cancelled() {
        if input.paused.load(Ordering::SeqCst) {
            if input.is_raw() {
                terminal::disable_raw_mode()?;
                input.raw.store(false, Ordering::SeqCst);
            }
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }
        if !input.is_raw() {
            terminal::enable_raw_mode()?;
            input.raw.store(true, Ordering::SeqCst);
        }
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        // Arrow and function keys arrive as whole key events, so a bare
        // Esc here is a real ESC press. Raw mode also swallows SIGINT.
        if let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
            && (key.code == KeyCode::Esc
                || (key.code == KeyCode::Char('c')
                    && key.modifiers.contains(KeyModifiers::CONTROL)))
        {
            debug!(key = ?key.code, "Interrupt key pressed, cancelling turn");
            cancel.cancel();
        }
    }
    Ok(())
}

/// Parse an answer at the approval prompt. A trailing `+` asks to add
/// guidance for the model, so the second value says whether to read it.
pub fn parse_choice(answer: &str) -> Option<(ApprovalChoice, bool)> {
    let answer = answer.trim();
    let (answer, wants_guidance) = match answer.strip_suffix('+') {
        Some(rest) => (rest.trim_end(), true),
        None => (answer, false),
    };
    let choice = match answer.to_ascii_lowercase().as_str() {
        "a" | "allow" | "y" | "yes" => Some(ApprovalChoice::AllowOnce),
        "s" | "session" => Some(ApprovalChoice::AllowSession),
        "d" | "deny" | "n" | "no" => Some(ApprovalChoice::Deny),
        "c" | "cancel" => Some(ApprovalChoice::CancelAll),
        "yolo" => Some(ApprovalChoice::Yolo),
        _ => None,
    }?;
    Some((choice, wants_guidance))
}

/// Short description of a call for the prompt.
pub fn describe_call(request: &ApprovalRequest<'_>) -> String {
    let mut text = describe_arguments(request);
    if let Some(warning) = request.warning {
        text.push_str(&format!("\n  [!] {warning}: requires manual approval"));
    }
    if let Some(preview) = request.preview {
        text.push_str(&format!("\n{}", preview.trim_end()));
    }
    text
}

fn describe_arguments(request: &ApprovalRequest<'_>) -> String {
    let args = request.arguments;
    let mut text = format!("Tool '{}' wants to run", request.tool_name);
    if let Some(command) = args["command"].as_str() {
        text.push_str(&format!(":\n  $ {command}"));
        if let Some(reason) = args["reason"].as_str() {
            text.push_str(&format!("\n  Reason: {reason}"));
        }
        return text;
    }
    if let Some(path) = args["path"].as_str() {
        text.push_str(&format!(" on '{path}'"));
    }
    let shown: serde_json::Map<String, serde_json::Value> = args
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(k, _)| k.as_str() != "path")
                .map(|(k, v)| (k.clone(), preview(v)))
                .collect()
        })
        .unwrap_or_default();
    if !shown.is_empty() {
        let pretty = serde_json::to_string_pretty(&shown).unwrap_or_default();
        text.push_str(&format!(" with:\n{pretty}"));
    }
    text
}

fn preview(value: &serde_json::Value) -> serde_json::Value {
    const LIMIT: usize = 400;
    match value {
        serde_json::Value::String(s) if s.chars().count() > LIMIT => {
            let head: String = s.chars().take(LIMIT).collect();
            serde_json::Value::String(format!("{head}... ({} chars)", s.chars().count()))
        }
        other => other.clone(),
    }
}

/// Asks on the terminal.
pub struct TerminalPrompter {
    input: Arc<InputState>,
}

impl TerminalPrompter {
    pub fn new(input: Arc<InputState>) -> Self {
        Self { input }
    }
}

#[async_trait]
impl ApprovalPrompter for TerminalPrompter {
    async fn prompt(&self, request: &ApprovalRequest<'_>) -> ApprovalReply {
        self.input.pause().await;
        let reply = ask(request).await;
        self.input.resume();
        reply
    }
}

async fn ask(request: &ApprovalRequest<'_>) -> ApprovalReply {
    println!("\n{}", describe_call(request));
    for _ in 0..MAX_PROMPT_ATTEMPTS {
        print!(
            "a) Allow once  s) Allow for session  d) Deny  c) Cancel all  yolo) YOLO\n\
             Add '+' to leave guidance (e.g. 'd+').\nChoose (a/s/d/c/yolo): "
        );
        let _ = io::stdout().flush();
        match read_line().await {
            Ok(Some(answer)) => match parse_choice(&answer) {
                Some((choice, false)) => return choice.into(),
                Some((choice, true)) => {
                    return ApprovalReply {
                        choice,
                        guidance: ask_guidance().await,
                    };
                }
                None => println!("Invalid choice. Please enter a, s, d, c or yolo."),
            },
            Ok(None) => {
                println!("\nInput closed. Denying tool call.");
                return ApprovalChoice::Deny.into();
            }
            Err(e) => {
                warn!(error = %e, "Failed to read approval answer");
                return ApprovalChoice::Deny.into();
            }
        }
    }
    println!("Max attempts reached. Denying tool call.");
    ApprovalChoice::Deny.into()
}

async fn ask_guidance() -> Option<String> {
    print!("Guidance: ");
    let _ = io::stdout().flush();
    match read_line().await {
        Ok(Some(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Failed to read guidance");
            None
        }
    }
}
