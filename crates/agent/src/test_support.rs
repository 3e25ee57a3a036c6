//! Shared test helpers for agent tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ferrocode_core::error::{ProviderError, ToolError};
use ferrocode_core::provider::{ChatBackend, ChatRequest, ResponseBody};
use ferrocode_core::tool::{ToolExecutor, ToolOutput, ToolRegistry, ToolSpec};
use futures::StreamExt;

use crate::approval::{ApprovalChoice, ApprovalPrompter, ApprovalReply, ApprovalRequest};

/// A prompter that answers with scripted replies, then denies.
pub struct ScriptedPrompter {
    replies: Mutex<VecDeque<ApprovalReply>>,
    seen: Mutex<Vec<(Option<String>, Option<&'static str>)>>,
    prompts: AtomicUsize,
}

impl ScriptedPrompter {
    pub fn new(choices: Vec<ApprovalChoice>) -> Self {
        Self::with_replies(choices.into_iter().map(ApprovalReply::from).collect())
    }

    pub fn with_replies(replies: Vec<ApprovalReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// The preview shown with each prompt, in order.
    pub fn previews(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    /// The warning shown with each prompt, in order.
    pub fn warnings(&self) -> Vec<Option<&'static str>> {
        self.seen.lock().unwrap().iter().map(|(_, w)| *w).collect()
    }
}

#[async_trait]
impl ApprovalPrompter for ScriptedPrompter {
    async fn prompt(&self, request: &ApprovalRequest<'_>) -> ApprovalReply {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((request.preview.map(str::to_string), request.warning));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ApprovalChoice::Deny.into())
    }
}

enum SpyBehavior {
    Output(String),
    Fail(String),
    Hang,
}

/// An executor that counts its invocations.
pub struct SpyExecutor {
    behavior: SpyBehavior,
    preview: Option<String>,
    calls: AtomicUsize,
    previews: AtomicUsize,
}

impl SpyExecutor {
    pub fn ok(content: &str) -> Arc<Self> {
        Self::with(SpyBehavior::Output(content.to_string()))
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Self::with(SpyBehavior::Fail(reason.to_string()))
    }

    /// Never returns.
    pub fn hanging() -> Arc<Self> {
        Self::with(SpyBehavior::Hang)
    }

    /// Succeeds with `content` and previews as `preview`.
    pub fn previewing(content: &str, preview: &str) -> Arc<Self> {
        Arc::new(Self {
            preview: Some(preview.to_string()),
            ..Self::plain(SpyBehavior::Output(content.to_string()))
        })
    }

    fn with(behavior: SpyBehavior) -> Arc<Self> {
        Arc::new(Self::plain(behavior))
    }

    fn plain(behavior: SpyBehavior) -> Self {
        Self {
            behavior,
            preview: None,
            calls: AtomicUsize::new(0),
            previews: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn previews(&self) -> usize {
        self.previews.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for SpyExecutor {
    async fn execute(
        &self,
        name: &str,
        _arguments: &serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            SpyBehavior::Output(content) => Ok(ToolOutput::success(content.clone())),
            SpyBehavior::Fail(reason) => Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: reason.clone(),
            }),
            SpyBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(ToolOutput::success(""))
            }
        }
    }

    async fn preview(&self, _name: &str, _arguments: &serde_json::Value) -> Option<String> {
        self.previews.fetch_add(1, Ordering::SeqCst);
        self.preview.clone()
    }
}

pub fn registry_with(tools: Vec<(&str, ToolSpec, Arc<SpyExecutor>)>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (name, spec, executor) in tools {
        registry.register(name, spec, executor);
    }
    registry
}

/// How a scripted response body behaves.
pub enum Reply {
    /// Stream these chunks, then end
    Body(Vec<Vec<u8>>),
    /// Fail before any body
    Fail(ProviderError),
    /// Stream these chunks, then go silent
    Hang(Vec<Vec<u8>>),
    /// Stream these chunks, then drop the connection with this error
    Break(Vec<Vec<u8>>, ProviderError),
}

impl From<Result<Vec<Vec<u8>>, ProviderError>> for Reply {
    fn from(reply: Result<Vec<Vec<u8>>, ProviderError>) -> Self {
        match reply {
            Ok(chunks) => Self::Body(chunks),
            Err(e) => Self::Fail(e),
        }
    }
}

/// A backend that streams scripted replies in order and records requests.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<Vec<Vec<u8>>, ProviderError>>) -> Arc<Self> {
        Self::with_replies(replies.into_iter().map(Reply::from).collect())
    }

    pub fn with_replies(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: &ChatRequest) -> Result<ResponseBody, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted backend ran out of replies");
        let stream = match reply {
            Reply::Body(chunks) => futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
            Reply::Fail(e) => return Err(e),
            Reply::Hang(chunks) => futures::stream::iter(chunks.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed(),
            Reply::Break(chunks, e) => futures::stream::iter(
                chunks.into_iter().map(Ok).chain(std::iter::once(Err(e))),
            )
            .boxed(),
        };
        Ok(ResponseBody::Stream(stream))
    }
}

fn frame(value: serde_json::Value) -> Vec<u8> {
    format!("data: {value}\n\n").into_bytes()
}

pub fn content_frame(text: &str) -> Vec<u8> {
    frame(serde_json::json!({"choices": [{"delta": {"content": text}}]}))
}

pub fn tool_call_frame(slot: u32, id: &str, name: &str, arguments: &str) -> Vec<u8> {
    frame(serde_json::json!({"choices": [{"delta": {"tool_calls": [{
        "index": slot,
        "id": id,
        "type": "function",
        "function": {"name": name, "arguments": arguments}
    }]}}]}))
}

pub fn finish_frame(reason: &str) -> Vec<u8> {
    frame(serde_json::json!({"choices": [{"delta": {}, "finish_reason": reason}]}))
}

pub fn done_frame() -> Vec<u8> {
    b"data: [DONE]\n\n".to_vec()
}

/// A plain text reply.
pub fn text_reply(parts: &[&str]) -> Result<Vec<Vec<u8>>, ProviderError> {
    let mut chunks: Vec<Vec<u8>> = parts.iter().map(|p| content_frame(p)).collect();
    chunks.push(finish_frame("stop"));
    chunks.push(done_frame());
    Ok(chunks)
}

/// A reply asking for one tool call.
pub fn tool_reply(id: &str, name: &str, arguments: &str) -> Result<Vec<Vec<u8>>, ProviderError> {
    Ok(vec![
        tool_call_frame(0, id, name, arguments),
        finish_frame("tool_calls"),
        done_frame(),
    ])
}
