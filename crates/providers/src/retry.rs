//! Retry controller around [`CancellableTransport`].
//!
//! Each failed attempt is classified, checked against the ceiling for its
//! class, and retried after an exponential backoff with jitter. The sleep is
//! raced against the cancellation token so an interrupt aborts a pending
//! retry as well as an in-flight request.
//!
//! Ceilings use `0` as "retry forever". By default that applies to 502, which
//! some gateways return for long stretches during deploys.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use ferrocode_config::RetryConfig;
use ferrocode_core::error::ProviderError;
use ferrocode_core::event::DomainEvent;
use ferrocode_core::provider::ChatRequest;
use rand::Rng;
use regex_lite::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{CancellableTransport, TurnOutcome};

/// Body text that marks a 500 as rate limiting in disguise.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate limited",
    "quota exceeded",
];

/// Error text that means the server dropped the connection.
const CONNECTION_DROP_MARKERS: &[&str] = &[
    "connection reset",
    "broken pipe",
    "eof detected",
    "server closed the connection",
    "connection unexpectedly",
];

/// Failure class used to pick a retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    RateLimited,
    ServerError,
    Timeout,
    Dns,
    ConnectionRefused,
    Other,
}

impl Classification {
    /// Timeout, DNS and connection failures share the network ceiling.
    pub fn is_network(self) -> bool {
        matches!(self, Self::Timeout | Self::Dns | Self::ConnectionRefused)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::ConnectionRefused => "connection_refused",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Classify a failed attempt.
pub fn classify(error: &ProviderError) -> Classification {
    match error {
        ProviderError::RateLimited { .. } => Classification::RateLimited,
        ProviderError::ApiError {
            status_code: 429, ..
        } => Classification::RateLimited,
        ProviderError::ApiError {
            status_code: 500,
            message,
        } if contains_any(message, RATE_LIMIT_MARKERS) => Classification::RateLimited,
        ProviderError::ApiError { status_code, .. } if (500..600).contains(status_code) => {
            Classification::ServerError
        }
        ProviderError::Timeout(_) => Classification::Timeout,
        ProviderError::Dns(_) => Classification::Dns,
        ProviderError::ConnectionRefused(_) => Classification::ConnectionRefused,
        ProviderError::Network(message) | ProviderError::StreamInterrupted(message)
            if contains_any(message, CONNECTION_DROP_MARKERS) =>
        {
            Classification::ConnectionRefused
        }
        _ => Classification::Other,
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    let lower = text.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// Where a failed call stands: how many retries so far, why, and how long
/// until the next attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub classification: Classification,
    pub next_delay: Duration,
}

/// Handed to the caller before each backoff sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    pub attempt: u32,
    pub classification: Classification,
    pub delay: Duration,
    pub reason: String,
    /// The failed attempt already streamed text that the retry will repeat
    pub partial_output: bool,
}

/// Backoff schedule and ceilings, built once from [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
    pub http_max_retries: u32,
    pub status_max_retries: BTreeMap<u16, u32>,
    pub network_max_retries: u32,
    pub retry_patterns: Vec<Regex>,
    pub no_retry_patterns: Vec<Regex>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build the policy, compiling the pattern lists. Invalid patterns are
    /// logged and ignored.
    pub fn from_config(config: &RetryConfig) -> Self {
        let status_max_retries = config
            .status_max_retries
            .iter()
            .filter_map(|(status, ceiling)| match status.parse::<u16>() {
                Ok(code) => Some((code, *ceiling)),
                Err(_) => {
                    warn!(status = %status, "Ignoring retry ceiling for non-numeric status");
                    None
                }
            })
            .collect();

        Self {
            enabled: config.enabled,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter_fraction: config.jitter_fraction,
            http_max_retries: config.http_max_retries,
            status_max_retries,
            network_max_retries: config.network_max_retries,
            retry_patterns: compile_patterns(&config.retry_patterns),
            no_retry_patterns: compile_patterns(&config.no_retry_patterns),
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exp = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = (initial * exp).min(max);
        Duration::from_secs_f64(if secs.is_finite() { secs } else { max })
    }

    /// Backoff before retry number `attempt`, scaled by `1 ± jitter_fraction`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter_fraction <= 0.0 {
            return base;
        }
        let factor = rand::rng()
            .random_range((1.0 - self.jitter_fraction)..=(1.0 + self.jitter_fraction));
        base.mul_f64(factor)
    }

    /// Retry ceiling for an error, or `None` if it must not be retried.
    /// `Some(0)` means unlimited.
    pub fn ceiling_for(&self, error: &ProviderError, classification: Classification) -> Option<u32> {
        let text = error.to_string();
        if self.no_retry_patterns.iter().any(|re| re.is_match(&text)) {
            return None;
        }
        if matches!(error, ProviderError::AuthenticationFailed(_)) {
            return None;
        }

        let class_ceiling = match classification {
            Classification::RateLimited | Classification::ServerError => Some(
                error
                    .status_code()
                    .and_then(|status| self.status_max_retries.get(&status).copied())
                    .unwrap_or(self.http_max_retries),
            ),
            c if c.is_network() => Some(self.network_max_retries),
            _ => None,
        };

        class_ceiling.or_else(|| {
            self.retry_patterns
                .iter()
                .any(|re| re.is_match(&text))
                .then_some(self.http_max_retries)
        })
    }

    /// Decide whether failure number `retries_so_far + 1` gets another try.
    pub fn next_state(&self, error: &ProviderError, retries_so_far: u32) -> Option<RetryState> {
        if !self.enabled {
            return None;
        }
        let classification = classify(error);
        let ceiling = self.ceiling_for(error, classification)?;
        if ceiling != 0 && retries_so_far >= ceiling {
            return None;
        }

        let next_delay = match error {
            ProviderError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Duration::from_secs(*secs).min(self.max_delay),
            _ => self.delay_for(retries_so_far),
        };

        Some(RetryState {
            attempt: retries_so_far + 1,
            classification,
            next_delay,
        })
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid retry pattern");
                None
            }
        })
        .collect()
}

/// Runs requests through a [`CancellableTransport`], retrying transient
/// failures per [`RetryPolicy`].
pub struct RetryController {
    transport: CancellableTransport,
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(transport: CancellableTransport, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &CancellableTransport {
        &self.transport
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `request` until it succeeds, is cancelled, or retries run out.
    pub async fn execute(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        on_content: &mut (dyn FnMut(&str) + Send),
    ) -> TurnOutcome {
        self.execute_with_notices(request, cancel, on_content, &mut |_: &RetryNotice| {})
            .await
    }

    /// Like [`execute`](Self::execute), calling `on_retry` before each
    /// backoff so a front end can explain repeated text.
    pub async fn execute_with_notices(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        on_content: &mut (dyn FnMut(&str) + Send),
        on_retry: &mut (dyn FnMut(&RetryNotice) + Send),
    ) -> TurnOutcome {
        let mut retries = 0u32;

        loop {
            let mut streamed = false;
            let outcome = {
                let mut tracked = |text: &str| {
                    streamed = true;
                    on_content(text);
                };
                self.transport.run(request, cancel, &mut tracked).await
            };
            let error = match outcome {
                TurnOutcome::Failed(error) => error,
                TurnOutcome::Cancelled => {
                    self.publish(DomainEvent::RequestCancelled {
                        timestamp: Utc::now(),
                    });
                    return TurnOutcome::Cancelled;
                }
                completed => {
                    if retries > 0 {
                        info!(retries, "Request succeeded after retrying");
                    }
                    return completed;
                }
            };

            let Some(state) = self.policy.next_state(&error, retries) else {
                warn!(attempts = retries + 1, error = %error, "Giving up on request");
                self.publish(DomainEvent::RequestFailed {
                    attempts: retries + 1,
                    error_message: error.to_string(),
                    timestamp: Utc::now(),
                });
                return TurnOutcome::Failed(error);
            };

            warn!(
                attempt = state.attempt,
                classification = %state.classification,
                delay_ms = state.next_delay.as_millis() as u64,
                error = %error,
                "Request failed; retrying"
            );
            self.publish(DomainEvent::RetryScheduled {
                attempt: state.attempt,
                classification: state.classification.to_string(),
                delay_ms: state.next_delay.as_millis() as u64,
                reason: error.to_string(),
                timestamp: Utc::now(),
            });
            on_retry(&RetryNotice {
                attempt: state.attempt,
                classification: state.classification,
                delay: state.next_delay,
                reason: error.to_string(),
                partial_output: streamed,
            });

            if !sleep_or_cancel(state.next_delay, cancel).await {
                debug!("Retry sleep interrupted");
                self.publish(DomainEvent::RequestCancelled {
                    timestamp: Utc::now(),
                });
                return TurnOutcome::Cancelled;
            }
            retries = state.attempt;
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = self.transport.event_bus() {
            bus.publish(event);
        }
    }
}

/// Sleep for `delay`; returns false if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
