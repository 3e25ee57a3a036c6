//! Cancellable execution of one backend request.
//!
//! The cancellation token is checked after every decoded frame and raced
//! against every read, so a long response stops as soon as the user asks. A
//! cancelled or failed turn is discarded whole: callers only ever see a
//! complete [`AssistantTurn`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use ferrocode_config::StreamingConfig;
use ferrocode_core::error::ProviderError;
use ferrocode_core::event::{DomainEvent, EventBus};
use ferrocode_core::provider::{ChatBackend, ChatRequest, ResponseBody, Usage};
use ferrocode_core::tool::ToolCall;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::assembler::ToolCallAssembler;
use crate::wire::{self, DeltaEvent, WireEventParser};

/// A fully received assistant response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Option<Usage>,
}

/// How a request ended.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed(AssistantTurn),
    Cancelled,
    Failed(ProviderError),
}

/// Running token totals, updated as soon as usage is reported (even if the
/// turn is later cancelled or fails).
#[derive(Debug, Default)]
pub struct UsageCounters {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageCounters {
    pub fn record(&self, prompt_tokens: u32, completion_tokens: u32) {
        self.prompt_tokens
            .fetch_add(prompt_tokens as u64, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens as u64, Ordering::Relaxed);
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed)
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens() + self.completion_tokens()
    }
}

/// Timing and strictness for reading a response.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Longest silence tolerated between two reads
    pub read_timeout: Duration,
    /// Longest a single streamed response may take
    pub total_timeout: Duration,
    /// Fail the turn on a malformed frame instead of skipping it
    pub strict_frames: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&StreamingConfig::default())
    }
}

impl From<&StreamingConfig> for TransportOptions {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            total_timeout: Duration::from_secs(config.total_timeout_secs),
            strict_frames: config.strict_frames,
        }
    }
}

/// Runs one request against a [`ChatBackend`] under a cancellation token.
pub struct CancellableTransport {
    backend: Arc<dyn ChatBackend>,
    options: TransportOptions,
    usage: Arc<UsageCounters>,
    events: Option<Arc<EventBus>>,
}

impl CancellableTransport {
    pub fn new(backend: Arc<dyn ChatBackend>, options: TransportOptions) -> Self {
        Self {
            backend,
            options,
            usage: Arc::new(UsageCounters::default()),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn usage(&self) -> &Arc<UsageCounters> {
        &self.usage
    }

    pub(crate) fn event_bus(&self) -> Option<&Arc<EventBus>> {
        self.events.as_ref()
    }

    /// Send `request` and read the response to completion.
    ///
    /// `on_content` receives each text fragment as it arrives, for display.
    pub async fn run(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        on_content: &mut (dyn FnMut(&str) + Send),
    ) -> TurnOutcome {
        if cancel.is_cancelled() {
            return TurnOutcome::Cancelled;
        }

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.options.total_timeout;
        let body = match self.open(request, cancel, deadline).await {
            Ok(body) => body,
            Err(Stop::Cancelled) => return TurnOutcome::Cancelled,
            Err(Stop::Failed(e)) => return TurnOutcome::Failed(e),
        };

        let mut turn = TurnBuilder::default();
        let result = match body {
            ResponseBody::Complete(text) => self.read_complete(&text, &mut turn, cancel, on_content),
            ResponseBody::Stream(stream) => {
                self.read_stream(stream, deadline, &mut turn, cancel, on_content)
                    .await
            }
        };

        match result {
            Ok(()) => {}
            Err(Stop::Cancelled) => {
                debug!(
                    discarded_chars = turn.content.len(),
                    "Response cancelled; discarding partial turn"
                );
                return TurnOutcome::Cancelled;
            }
            Err(Stop::Failed(e)) => return TurnOutcome::Failed(e),
        }

        let turn = match turn.finish() {
            Ok(turn) => turn,
            Err(e) => return TurnOutcome::Failed(e),
        };

        if let Some(events) = &self.events {
            let usage = turn.usage.unwrap_or_default();
            events.publish(DomainEvent::ResponseCompleted {
                model: request.model.clone(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
        }

        TurnOutcome::Completed(turn)
    }

    /// Wait for the response head. A streamed request gets `read_timeout` for
    /// its first reply and the total deadline starts here; a complete body is
    /// bounded by the backend's own HTTP timeout.
    async fn open(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> Result<ResponseBody, Stop> {
        if !request.stream {
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Stop::Cancelled),
                body = self.backend.open(request) => body.map_err(Stop::Failed),
            };
        }

        let read_timeout = self.options.read_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Stop::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(self.total_timeout()),
            body = tokio::time::timeout(read_timeout, self.backend.open(request)) => match body {
                Ok(body) => body.map_err(Stop::Failed),
                Err(_) => Err(Stop::Failed(ProviderError::Timeout(format!(
                    "no response within {}s",
                    read_timeout.as_secs()
                )))),
            },
        }
    }

    fn total_timeout(&self) -> Stop {
        Stop::Failed(ProviderError::Timeout(format!(
            "response exceeded {}s",
            self.options.total_timeout.as_secs()
        )))
    }

    fn read_complete(
        &self,
        text: &str,
        turn: &mut TurnBuilder,
        cancel: &CancellationToken,
        on_content: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), Stop> {
        let events = wire::decode_complete(text).map_err(Stop::Failed)?;
        for event in events {
            self.apply(turn, event, on_content)?;
            if cancel.is_cancelled() {
                return Err(Stop::Cancelled);
            }
        }
        Ok(())
    }

    async fn read_stream(
        &self,
        mut stream: futures::stream::BoxStream<'static, Result<Vec<u8>, ProviderError>>,
        deadline: tokio::time::Instant,
        turn: &mut TurnBuilder,
        cancel: &CancellationToken,
        on_content: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), Stop> {
        let mut parser = WireEventParser::new();
        let read_timeout = self.options.read_timeout;

        while !parser.is_done() {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Stop::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(self.total_timeout()),
                next = tokio::time::timeout(read_timeout, stream.next()) => next,
            };

            let events = match next {
                Err(_) => {
                    return Err(Stop::Failed(ProviderError::Timeout(format!(
                        "no data received for {}s",
                        read_timeout.as_secs()
                    ))));
                }
                Ok(None) => parser.finish(),
                Ok(Some(Err(e))) => return Err(Stop::Failed(e)),
                Ok(Some(Ok(bytes))) => parser.feed(&bytes),
            };

            for event in events {
                self.apply(turn, event, on_content)?;
                if cancel.is_cancelled() {
                    return Err(Stop::Cancelled);
                }
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        turn: &mut TurnBuilder,
        event: DeltaEvent,
        on_content: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), Stop> {
        match event {
            DeltaEvent::ContentDelta { text } => {
                on_content(&text);
                turn.content.push_str(&text);
            }
            DeltaEvent::ToolCallDelta { .. } => turn.assembler.accumulate(&event),
            DeltaEvent::FinishSignal { reason } => turn.finish_reason = Some(reason),
            DeltaEvent::UsageInfo {
                prompt_tokens,
                completion_tokens,
            } => {
                self.usage.record(prompt_tokens, completion_tokens);
                turn.usage = Some(Usage::new(prompt_tokens, completion_tokens));
            }
            DeltaEvent::StreamError { raw, reason } => {
                if self.options.strict_frames {
                    return Err(Stop::Failed(ProviderError::Protocol(format!(
                        "{reason} in frame: {raw}"
                    ))));
                }
                warn!(frame = %raw, error = %reason, "Skipping unparseable frame");
            }
        }
        Ok(())
    }
}

enum Stop {
    Cancelled,
    Failed(ProviderError),
}

#[derive(Default)]
struct TurnBuilder {
    content: String,
    assembler: ToolCallAssembler,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl TurnBuilder {
    fn finish(self) -> Result<AssistantTurn, ProviderError> {
        let finish_reason = self.finish_reason.ok_or_else(|| {
            ProviderError::StreamInterrupted("response ended before finish signal".into())
        })?;
        Ok(AssistantTurn {
            content: self.content,
            tool_calls: self.assembler.sealed(),
            finish_reason,
            usage: self.usage,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// One scripted reply for [`ScriptedBackend`].
    pub enum Reply {
        /// Stream these byte chunks, then end the body
        Chunks(Vec<Vec<u8>>),
        /// Stream these chunks, then stay silent forever
        ChunksThenHang(Vec<Vec<u8>>),
        Complete(String),
        Error(ProviderError),
        /// Accept the request and never answer
        Silent,
        /// Stream these chunks, then fail the body with this error
        ChunksThenError(Vec<Vec<u8>>, ProviderError),
    }

    /// A backend that plays back scripted replies in order.
    pub struct ScriptedBackend {
        replies: Mutex<VecDeque<Reply>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn open(&self, _request: &ChatRequest) -> Result<ResponseBody, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted backend ran out of replies");
            match reply {
                Reply::Chunks(chunks) => Ok(ResponseBody::Stream(
                    futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
                )),
                Reply::ChunksThenHang(chunks) => Ok(ResponseBody::Stream(
                    futures::stream::iter(chunks.into_iter().map(Ok))
                        .chain(futures::stream::pending())
                        .boxed(),
                )),
                Reply::Complete(body) => Ok(ResponseBody::Complete(body)),
                Reply::Error(e) => Err(e),
                Reply::Silent => futures::future::pending().await,
                Reply::ChunksThenError(chunks, error) => Ok(ResponseBody::Stream(
                    futures::stream::iter(
                        chunks.into_iter().map(Ok).chain(std::iter::once(Err(error))),
                    )
                    .boxed(),
                )),
            }
        }
    }

    pub fn content_frame(text: &str) -> Vec<u8> {
        let frame = serde_json::json!({"choices": [{"delta": {"content": text}}]});
        format!("data: {frame}\n\n").into_bytes()
    }

    pub fn usage_frame(prompt: u32, completion: u32) -> Vec<u8> {
        let frame = serde_json::json!({
            "choices": [],
            "usage": {"prompt_tokens": prompt, "completion_tokens": completion}
        });
        format!("data: {frame}\n\n").into_bytes()
    }

    pub fn done_frame() -> Vec<u8> {
        b"data: [DONE]\n\n".to_vec()
    }

    pub fn request() -> ChatRequest {
        ChatRequest::new(
            "test-model",
            vec![ferrocode_core::message::Message::user("hi")],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn transport(backend: Arc<ScriptedBackend>) -> CancellableTransport {
        CancellableTransport::new(backend, TransportOptions::default())
    }

    #[tokio::test]
    async fn content_fragments_become_one_turn() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Chunks(vec![
            content_frame("Hel"),
            content_frame("lo"),
            done_frame(),
        ])]));
        let mut seen = Vec::new();
        let outcome = transport(backend)
            .run(&request(), &CancellationToken::new(), &mut |t: &str| {
                seen.push(t.to_string())
            })
            .await;

        let TurnOutcome::Completed(turn) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(turn.content, "Hello");
        assert!(turn.tool_calls.is_empty());
        assert_eq!(seen, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_discards_turn() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::ChunksThenHang(vec![
            content_frame("one"),
            content_frame("two"),
        ])]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut received = 0;

        let outcome = transport(backend)
            .run(&request(), &cancel, &mut |_: &str| {
                received += 1;
                if received == 2 {
                    trigger.cancel();
                }
            })
            .await;

        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_data() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::ChunksThenHang(vec![
            content_frame("partial"),
        ])]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = transport(backend)
            .run(&request(), &cancel, &mut |_: &str| {})
            .await;
        assert!(matches!(outcome, TurnOutcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_times_out() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::ChunksThenHang(vec![])]));
        let options = TransportOptions {
            read_timeout: Duration::from_secs(5),
            ..TransportOptions::default()
        };
        let outcome = CancellableTransport::new(backend, options)
            .run(&request(), &CancellationToken::new(), &mut |_: &str| {})
            .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Failed(ProviderError::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out_before_headers() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Silent]));
        let options = TransportOptions {
            read_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(10),
            ..TransportOptions::default()
        };
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            CancellableTransport::new(backend, options).run(
                &request(),
                &CancellationToken::new(),
                &mut |_: &str| {},
            ),
        )
        .await
        .expect("open must be bounded by the read timeout");
        assert!(matches!(
            outcome,
            TurnOutcome::Failed(ProviderError::Timeout(ref m)) if m.contains("5s")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn total_deadline_covers_the_wait_for_headers() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Silent]));
        let options = TransportOptions {
            read_timeout: Duration::from_secs(60),
            total_timeout: Duration::from_secs(10),
            ..TransportOptions::default()
        };
        let outcome = CancellableTransport::new(backend, options)
            .run(&request(), &CancellationToken::new(), &mut |_: &str| {})
            .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Failed(ProviderError::Timeout(ref m)) if m.contains("exceeded 10s")
        ));
    }

    #[tokio::test]
    async fn usage_is_recorded_even_when_cancelled() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::ChunksThenHang(vec![
            usage_frame(12, 3),
            content_frame("x"),
        ])]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let transport = transport(backend);

        let outcome = transport
            .run(&request(), &cancel, &mut |_: &str| trigger.cancel())
            .await;
        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert_eq!(transport.usage().prompt_tokens(), 12);
        assert_eq!(transport.usage().total_tokens(), 15);
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_unless_strict() {
        let chunks = vec![
            b"data: {oops\n\n".to_vec(),
            content_frame("fine"),
            done_frame(),
        ];
        let backend = Arc::new(ScriptedBackend::new(vec![
            Reply::Chunks(chunks.clone()),
            Reply::Chunks(chunks),
        ]));

        let lenient = transport(backend.clone());
        let outcome = lenient
            .run(&request(), &CancellationToken::new(), &mut |_: &str| {})
            .await;
        assert!(matches!(outcome, TurnOutcome::Completed(ref t) if t.content == "fine"));

        let strict = CancellableTransport::new(
            backend,
            TransportOptions {
                strict_frames: true,
                ..TransportOptions::default()
            },
        );
        let outcome = strict
            .run(&request(), &CancellationToken::new(), &mut |_: &str| {})
            .await;
        assert!(matches!(outcome, TurnOutcome::Failed(ProviderError::Protocol(_))));
    }

    #[tokio::test]
    async fn complete_body_matches_streamed_semantics() {
        let body = r#"{"choices":[{"message":{"content":"Hello","tool_calls":[{"id":"","function":{"name":"pwd","arguments":""}}]},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":4,"completion_tokens":2}}"#;
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Complete(body.into())]));
        let mut seen = String::new();
        let outcome = transport(backend)
            .run(&request(), &CancellationToken::new(), &mut |t: &str| {
                seen.push_str(t)
            })
            .await;

        let TurnOutcome::Completed(turn) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(seen, "Hello");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "tool_call_0");
        assert_eq!(turn.usage, Some(Usage::new(4, 2)));
        assert_eq!(turn.finish_reason, "tool_calls");
    }

    #[tokio::test]
    async fn stream_error_surfaces_as_failure() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Error(
            ProviderError::ConnectionRefused("connection refused".into()),
        )]));
        let outcome = transport(backend)
            .run(&request(), &CancellationToken::new(), &mut |_: &str| {})
            .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Failed(ProviderError::ConnectionRefused(_))
        ));
    }

    #[tokio::test]
    async fn completion_publishes_event() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Chunks(vec![
            content_frame("ok"),
            usage_frame(1, 1),
            done_frame(),
        ])]));
        let transport = transport(backend).with_event_bus(bus);
        transport
            .run(&request(), &CancellationToken::new(), &mut |_: &str| {})
            .await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::ResponseCompleted { prompt_tokens: 1, .. }
        ));
    }
}
