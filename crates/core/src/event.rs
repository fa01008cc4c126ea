//! Domain events for decoupled observation of the trigger pipeline.
//!
//! Events are published when a trigger is accepted or dropped, when a reply
//! is posted or revised, and when a generation session ends. The CLI
//! subscribes to log them; tests subscribe to assert on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A message passed the event filter and acquired the flight permit
    TriggerReceived {
        channel: String,
        author: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A trigger arrived while a session was already in flight
    TriggerDropped {
        channel: String,
        author: String,
        timestamp: DateTime<Utc>,
    },

    /// The first visible reply was posted
    ResponseSent {
        channel: String,
        message_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A visible reply was revised with newer text
    ResponseEdited {
        channel: String,
        message_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A generation session reached a terminal state
    SessionFinished {
        channel: String,
        outcome: String, // "converged", "suppressed", "empty", "failed", "cancelled"
        ticks: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
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
