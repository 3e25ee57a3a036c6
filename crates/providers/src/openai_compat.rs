//! OpenAI-compatible chat backend.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, LM Studio and any endpoint
//! that exposes `/chat/completions`. This type only opens the request and maps
//! failures onto [`ProviderError`]; decoding happens in [`crate::wire`].

use std::time::Duration;

use async_trait::async_trait;
use ferrocode_config::ApiConfig;
use ferrocode_core::error::ProviderError;
use ferrocode_core::message::{Message, Role};
use ferrocode_core::provider::{ChatBackend, ChatRequest, ResponseBody, ToolDefinition};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

/// An OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    http_timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a backend for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        http_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        // No client-wide timeout: streamed bodies are bounded by the transport.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_timeout,
            client,
        })
    }

    /// Create a backend from the `[api]` configuration section.
    pub fn from_config(config: &ApiConfig) -> Result<Self, ProviderError> {
        Self::new(
            "openai",
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_body(request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": request.stream,
        });

        if request.stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let tool_calls: Vec<ApiToolCall> = m
                    .tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: tc.id.clone(),
                        r#type: "function".into(),
                        function: ApiFunction {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect();
                let content = if m.content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                };
                ApiMessage {
                    role: match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::System => "system",
                        Role::Tool => "tool",
                    },
                    content,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function",
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, request: &ChatRequest) -> Result<ResponseBody, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(request);

        debug!(
            provider = %self.name,
            model = %request.model,
            stream = request.stream,
            messages = request.messages.len(),
            "Sending chat request"
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if request.stream {
            builder = builder.header("Accept", "text/event-stream");
        } else {
            builder = builder.timeout(self.http_timeout);
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::RateLimited {
                retry_after_secs,
                message,
            });
        }

        if status == 401 || status == 403 {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::AuthenticationFailed(format!(
                "HTTP {status}: {message}"
            )));
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        if request.stream {
            let stream = response
                .bytes_stream()
                .map(|chunk| {
                    chunk
                        .map(|bytes| bytes.to_vec())
                        .map_err(|e| ProviderError::StreamInterrupted(error_chain(&e)))
                })
                .boxed();
            Ok(ResponseBody::Stream(stream))
        } else {
            let text = response.text().await.map_err(map_send_error)?;
            Ok(ResponseBody::Complete(text))
        }
    }
}

/// Map a reqwest failure onto the transport error the retry controller expects.
fn map_send_error(e: reqwest::Error) -> ProviderError {
    let detail = error_chain(&e);
    if e.is_timeout() {
        return ProviderError::Timeout(detail);
    }
    let lower = detail.to_lowercase();
    if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("nodename nor servname")
    {
        return ProviderError::Dns(detail);
    }
    if e.is_connect() || lower.contains("connection refused") {
        return ProviderError::ConnectionRefused(detail);
    }
    ProviderError::Network(detail)
}

/// Flatten an error and its sources into one line; reqwest keeps the useful
/// part (e.g. "Connection refused") in the source chain.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: &'static str,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}
