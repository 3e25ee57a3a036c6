//! Approval gate: decides whether a tool call may run without asking.
//!
//! Per approval key the states are `Unknown -> Prompted -> {AllowedOnce,
//! AllowedForSession, Denied}`. Only session approvals are remembered; an
//! allow-once or a denial leaves the key `Unknown`, so the next identical call
//! prompts again. Auto-approved tools and YOLO mode skip the prompt.
//!
//! The key is the tool name when the tool's approval ignores its arguments,
//! otherwise `name:k=v&...` over the sorted arguments minus the tool's
//! excluded keys. Shell commands are keyed by the program they run. Keys are
//! stored as SHA-256 digests.
//!
//! A shell command that chains, pipes, redirects, substitutes or escalates is
//! never covered by a session approval: it prompts every time, and approving
//! it "for the session" only allows that one call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ferrocode_core::tool::ToolSpec;
use ferrocode_tools::{main_command, risky_pattern};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// What the user picked at a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalChoice {
    AllowOnce,
    AllowSession,
    Deny,
    /// Deny this call and every remaining call in the batch
    CancelAll,
    /// Allow this call and stop asking for the rest of the session
    Yolo,
}

/// Where a call stands before any prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    AutoApproved,
    AllowedForSession,
    NeedsPrompt,
}

/// The gate's verdict for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied,
    CancelAll,
}

/// A remembered decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub tool_name: String,
    pub fingerprint: String,
    pub decision: ApprovalChoice,
}

/// What the prompter is shown.
#[derive(Debug)]
pub struct ApprovalRequest<'a> {
    pub tool_name: &'a str,
    pub spec: &'a ToolSpec,
    pub arguments: &'a serde_json::Value,
    /// Output of the tool's preview, if it has one
    pub preview: Option<&'a str>,
    /// Why this call cannot ride on a session approval
    pub warning: Option<&'static str>,
}

/// The user's answer, with an optional note for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalReply {
    pub choice: ApprovalChoice,
    pub guidance: Option<String>,
}

impl From<ApprovalChoice> for ApprovalReply {
    fn from(choice: ApprovalChoice) -> Self {
        Self {
            choice,
            guidance: None,
        }
    }
}

/// A decision plus whatever the user wanted the model to know about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateVerdict {
    pub decision: GateDecision,
    pub guidance: Option<String>,
}

/// Asks the user about one call. The CLI implements this on the terminal;
/// tests script it.
#[async_trait]
pub trait ApprovalPrompter: Send + Sync {
    async fn prompt(&self, request: &ApprovalRequest<'_>) -> ApprovalReply;
}

pub struct ApprovalGate {
    prompter: Arc<dyn ApprovalPrompter>,
    yolo: bool,
    session: HashMap<String, ApprovalRecord>,
}

impl ApprovalGate {
    pub fn new(prompter: Arc<dyn ApprovalPrompter>, yolo: bool) -> Self {
        Self {
            prompter,
            yolo,
            session: HashMap::new(),
        }
    }

    pub fn is_yolo(&self) -> bool {
        self.yolo
    }

    pub fn set_yolo(&mut self, yolo: bool) {
        self.yolo = yolo;
    }

    /// Number of session approvals currently held.
    pub fn session_approvals(&self) -> usize {
        self.session.len()
    }

    /// Forget every session approval.
    pub fn revoke_all(&mut self) {
        info!(count = self.session.len(), "Revoking session approvals");
        self.session.clear();
    }

    pub fn check(&self, name: &str, spec: &ToolSpec, arguments: &serde_json::Value) -> ApprovalState {
        if spec.auto_approved || self.yolo {
            return ApprovalState::AutoApproved;
        }
        if risky_call(name, arguments).is_some() {
            return ApprovalState::NeedsPrompt;
        }
        let fingerprint = fingerprint(&approval_key(name, spec, arguments));
        if self.session.contains_key(&fingerprint) {
            ApprovalState::AllowedForSession
        } else {
            ApprovalState::NeedsPrompt
        }
    }

    /// Check the call and prompt if needed.
    pub async fn resolve(
        &mut self,
        name: &str,
        spec: &ToolSpec,
        arguments: &serde_json::Value,
    ) -> GateDecision {
        self.resolve_with_preview(name, spec, arguments, None)
            .await
            .decision
    }

    /// Like [`resolve`](Self::resolve), showing `preview` if a prompt is needed
    /// and passing along any guidance the user typed.
    pub async fn resolve_with_preview(
        &mut self,
        name: &str,
        spec: &ToolSpec,
        arguments: &serde_json::Value,
        preview: Option<&str>,
    ) -> GateVerdict {
        match self.check(name, spec, arguments) {
            ApprovalState::AutoApproved | ApprovalState::AllowedForSession => {
                return GateVerdict {
                    decision: GateDecision::Allowed,
                    guidance: None,
                };
            }
            ApprovalState::NeedsPrompt => {}
        }

        let warning = risky_call(name, arguments);
        let request = ApprovalRequest {
            tool_name: name,
            spec,
            arguments,
            preview,
            warning,
        };
        let reply = self.prompter.prompt(&request).await;
        debug!(tool = %name, choice = ?reply.choice, guidance = reply.guidance.is_some(), "Approval decision");

        GateVerdict {
            decision: self.apply(name, spec, arguments, reply.choice, warning.is_some()),
            guidance: reply.guidance.filter(|g| !g.trim().is_empty()),
        }
    }

    fn apply(
        &mut self,
        name: &str,
        spec: &ToolSpec,
        arguments: &serde_json::Value,
        choice: ApprovalChoice,
        risky: bool,
    ) -> GateDecision {
        match choice {
            ApprovalChoice::AllowOnce => GateDecision::Allowed,
            ApprovalChoice::AllowSession if risky => {
                debug!(tool = %name, "Risky command allowed once, not remembered");
                GateDecision::Allowed
            }
            ApprovalChoice::AllowSession => {
                let key = approval_key(name, spec, arguments);
                let fingerprint = fingerprint(&key);
                self.session.insert(
                    fingerprint.clone(),
                    ApprovalRecord {
                        tool_name: name.to_string(),
                        fingerprint,
                        decision: choice,
                    },
                );
                GateDecision::Allowed
            }
            ApprovalChoice::Yolo => {
                info!("YOLO mode enabled for the rest of the session");
                self.yolo = true;
                GateDecision::Allowed
            }
            ApprovalChoice::Deny => GateDecision::Denied,
            ApprovalChoice::CancelAll => GateDecision::CancelAll,
        }
    }
}

/// Why a call must be confirmed on its own, if it must.
fn risky_call(name: &str, arguments: &serde_json::Value) -> Option<&'static str> {
    if name != "run_shell_command" {
        return None;
    }
    arguments["command"].as_str().and_then(risky_pattern)
}

/// The readable approval key for a call.
pub fn approval_key(name: &str, spec: &ToolSpec, arguments: &serde_json::Value) -> String {
    if !spec.approval_scope_includes_arguments() {
        return name.to_string();
    }
    if name == "run_shell_command"
        && let Some(program) = arguments["command"].as_str().and_then(main_command)
    {
        return format!("{name}:{program}");
    }

    let sorted: BTreeMap<&String, &serde_json::Value> = arguments
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(k, _)| !spec.approval_key_exclude_arguments.contains(*k))
                .collect()
        })
        .unwrap_or_default();
    let pairs: Vec<String> = sorted
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect();
    format!("{name}:{}", pairs.join("&"))
}

pub fn fingerprint(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
