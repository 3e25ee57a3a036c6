//! Domain event system.
//!
//! The transport, retry controller and pipeline publish events as they work;
//! the CLI subscribes to keep session statistics. Nothing depends on an event
//! being observed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A backend turn completed
    ResponseCompleted {
        model: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A backend attempt failed and will be retried
    RetryScheduled {
        attempt: u32,
        classification: String,
        delay_ms: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A backend call gave up
    RequestFailed {
        attempts: u32,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The user cancelled an in-flight turn
    RequestCancelled { timestamp: DateTime<Utc> },

    /// A tool call resolved (executed, denied, blocked or invalid)
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
