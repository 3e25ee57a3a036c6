//! Chat-completion wire format: server-sent event frames and complete bodies.
//!
//! [`WireEventParser`] turns the raw bytes of a streamed response into
//! [`DeltaEvent`]s. Bytes may arrive split at any point, including inside a
//! multi-byte character; only complete lines are decoded, so the emitted
//! events do not depend on how the stream was chunked.
//!
//! [`decode_complete`] turns a non-streamed response body into the same event
//! sequence, so everything downstream is identical in both modes.

use ferrocode_core::error::ProviderError;
use serde::Deserialize;
use tracing::trace;

const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of an assistant response.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEvent {
    /// A piece of assistant text
    ContentDelta { text: String },

    /// A fragment of the tool call in `slot_index`
    ToolCallDelta {
        slot_index: u32,
        id: Option<String>,
        name: Option<String>,
        args_fragment: Option<String>,
    },

    /// The response is complete
    FinishSignal { reason: String },

    /// Token accounting for the response
    UsageInfo {
        prompt_tokens: u32,
        completion_tokens: u32,
    },

    /// A frame that could not be decoded; `raw` is the frame payload
    StreamError { raw: String, reason: String },
}

/// Incremental SSE decoder for one response.
///
/// Not resumable: a new parser is created for each request.
#[derive(Debug, Default)]
pub struct WireEventParser {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline
    scanned: usize,
    last_finish_reason: Option<String>,
    done: bool,
}

impl WireEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next read; returns the events of every frame it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DeltaEvent> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            let line = self.buffer[start..end].to_vec();
            start = end + 1;
            self.scanned = start;
            self.decode_line(&line, &mut events);
            if self.done {
                self.buffer.clear();
                self.scanned = 0;
                return events;
            }
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        events
    }

    /// The byte stream ended. Decodes a trailing unterminated line and emits
    /// the finish signal if the sentinel was never seen.
    pub fn finish(&mut self) -> Vec<DeltaEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut events);
        }
        if !self.done {
            self.done = true;
            events.push(DeltaEvent::FinishSignal {
                reason: self
                    .last_finish_reason
                    .take()
                    .unwrap_or_else(|| "eof".into()),
            });
        }
        events
    }

    /// Whether the terminating frame has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, line: &[u8], events: &mut Vec<DeltaEvent>) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');

        // Blank lines separate events; ':' lines are comments (keep-alives).
        if line.trim().is_empty() || line.starts_with(':') {
            return;
        }

        let Some(payload) = line.strip_prefix("data:") else {
            trace!(line = %line, "Ignoring non-data SSE field");
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return;
        }

        if payload == DONE_SENTINEL {
            self.done = true;
            events.push(DeltaEvent::FinishSignal {
                reason: self
                    .last_finish_reason
                    .take()
                    .unwrap_or_else(|| "stop".into()),
            });
            return;
        }

        match serde_json::from_str::<StreamResponse>(payload) {
            Ok(chunk) => self.decode_chunk(chunk, payload, events),
            Err(e) => events.push(DeltaEvent::StreamError {
                raw: payload.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn decode_chunk(&mut self, chunk: StreamResponse, payload: &str, events: &mut Vec<DeltaEvent>) {
        if let Some(error) = chunk.error {
            events.push(DeltaEvent::StreamError {
                raw: payload.to_string(),
                reason: error.describe(),
            });
            return;
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(DeltaEvent::ContentDelta { text });
            }
            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let (name, args_fragment) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                events.push(DeltaEvent::ToolCallDelta {
                    slot_index: tc.index,
                    id: tc.id,
                    name,
                    args_fragment,
                });
            }
            if let Some(reason) = choice.finish_reason {
                self.last_finish_reason = Some(reason);
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(DeltaEvent::UsageInfo {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            });
        }
    }
}

/// Decode a complete (non-streamed) response body into delta events.
pub fn decode_complete(body: &str) -> Result<Vec<DeltaEvent>, ProviderError> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Protocol(format!("Failed to parse response: {e}")))?;

    if let Some(error) = response.error {
        return Err(ProviderError::Protocol(error.describe()));
    }

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Protocol("No choices in response".into()))?;

    let mut events = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        events.push(DeltaEvent::ContentDelta { text });
    }
    for (slot, tc) in choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
    {
        let arguments = match tc.function.arguments {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        events.push(DeltaEvent::ToolCallDelta {
            slot_index: slot as u32,
            id: tc.id,
            name: Some(tc.function.name),
            args_fragment: Some(arguments),
        });
    }
    if let Some(usage) = response.usage {
        events.push(DeltaEvent::UsageInfo {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        });
    }
    events.push(DeltaEvent::FinishSignal {
        reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
    });
    Ok(events)
}

// --- Wire types (internal) ---

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorBody {
    Structured {
        message: String,
        #[serde(default, rename = "type")]
        kind: Option<String>,
    },
    Text(String),
    Other(serde_json::Value),
}

impl ApiErrorBody {
    fn describe(&self) -> String {
        match self {
            Self::Structured {
                message,
                kind: Some(kind),
            } => format!("{kind}: {message}"),
            Self::Structured { message, .. } => message.clone(),
            Self::Text(text) => text.clone(),
            Self::Other(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ApiFunction,
}

#[derive(Debug, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}
