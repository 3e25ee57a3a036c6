//! Session statistics, collected from the event bus.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ferrocode_core::event::{DomainEvent, EventBus};
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug)]
pub struct SessionStats {
    started: Instant,
    pub requests: u64,
    pub failures: u64,
    pub retries: u64,
    pub cancellations: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub api_time: Duration,
    pub tool_time: Duration,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            requests: 0,
            failures: 0,
            retries: 0,
            cancellations: 0,
            tool_calls: 0,
            tool_errors: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            api_time: Duration::ZERO,
            tool_time: Duration::ZERO,
        }
    }
}

impl SessionStats {
    pub fn record(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::ResponseCompleted {
                prompt_tokens,
                completion_tokens,
                duration_ms,
                ..
            } => {
                self.requests += 1;
                self.prompt_tokens += u64::from(*prompt_tokens);
                self.completion_tokens += u64::from(*completion_tokens);
                self.api_time += Duration::from_millis(*duration_ms);
            }
            DomainEvent::RetryScheduled { .. } => self.retries += 1,
            DomainEvent::RequestFailed { .. } => self.failures += 1,
            DomainEvent::RequestCancelled { .. } => self.cancellations += 1,
            DomainEvent::ToolExecuted {
                success,
                duration_ms,
                ..
            } => {
                self.tool_calls += 1;
                if !success {
                    self.tool_errors += 1;
                }
                self.tool_time += Duration::from_millis(*duration_ms);
            }
        }
    }

    /// Output tokens per second of API time.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.api_time.as_secs_f64();
        if secs > 0.0 {
            self.completion_tokens as f64 / secs
        } else {
            0.0
        }
    }

    pub fn report(&self) -> String {
        let mut out = String::from("=== Session Statistics ===\n");
        out.push_str(&format!(
            "Session duration: {}\n",
            format_duration(self.started.elapsed())
        ));
        out.push_str(&format!("API requests: {}\n", self.requests + self.failures));
        out.push_str(&format!("  - Successful: {}\n", self.requests));
        out.push_str(&format!("  - Failed: {}\n", self.failures));
        out.push_str(&format!("  - Retries: {}\n", self.retries));
        out.push_str(&format!("  - Cancelled: {}\n", self.cancellations));
        out.push_str(&format!("  - Time spent: {}\n", format_duration(self.api_time)));
        out.push_str(&format!(
            "  - Tokens: {} input, {} output ({} total)\n",
            self.prompt_tokens,
            self.completion_tokens,
            self.prompt_tokens + self.completion_tokens
        ));
        out.push_str(&format!(
            "  - Tokens per second: {:.1}\n",
            self.tokens_per_second()
        ));
        out.push_str(&format!("Tool calls: {}\n", self.tool_calls));
        out.push_str(&format!("  - Errors: {}\n", self.tool_errors));
        out.push_str(&format!("  - Time spent: {}", format_duration(self.tool_time)));
        out
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Subscribe to `bus` and fold every event into shared stats.
pub fn spawn_collector(bus: &EventBus) -> Arc<Mutex<SessionStats>> {
    let stats = Arc::new(Mutex::new(SessionStats::default()));
    let mut rx = bus.subscribe();
    let sink = Arc::clone(&stats);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(mut stats) = sink.lock() {
                        stats.record(&event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Stats collector lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn now() -> chrono::DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn events_fold_into_counters() {
        let mut stats = SessionStats::default();
        stats.record(&DomainEvent::ResponseCompleted {
            model: "m".into(),
            prompt_tokens: 100,
            completion_tokens: 50,
            duration_ms: 2_000,
            timestamp: now(),
        });
        stats.record(&DomainEvent::RetryScheduled {
            attempt: 1,
            classification: "rate_limited".into(),
            delay_ms: 10,
            reason: "429".into(),
            timestamp: now(),
        });
        stats.record(&DomainEvent::ToolExecuted {
            tool_name: "grep".into(),
            success: false,
            duration_ms: 5,
            timestamp: now(),
        });
        stats.record(&DomainEvent::RequestCancelled { timestamp: now() });

        assert_eq!(stats.requests, 1);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.tool_calls, 1);
        assert_eq!(stats.tool_errors, 1);
        assert_eq!(stats.cancellations, 1);
        assert!((stats.tokens_per_second() - 25.0).abs() < f64::EPSILON);

        let report = stats.report();
        assert!(report.contains("Tokens: 100 input, 50 output (150 total)"));
        assert!(report.contains("Tool calls: 1\n  - Errors: 1"));
    }

    #[test]
    fn duration_format() {
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1:02:05");
    }

    #[tokio::test]
    async fn collector_sees_published_events() {
        let bus = EventBus::new(8);
        let stats = spawn_collector(&bus);
        bus.publish(DomainEvent::RequestFailed {
            attempts: 3,
            error_message: "boom".into(),
            timestamp: now(),
        });
        for _ in 0..50 {
            if stats.lock().unwrap().failures == 1 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("collector never recorded the failure");
    }
}
