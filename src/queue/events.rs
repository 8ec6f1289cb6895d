//! Queue lifecycle events and the broadcast bus that carries them.
//!
//! Events are for observability only. Delivery is in-process and best-effort:
//! with no subscribers an event is dropped, and a receiver that falls behind
//! the buffer sees `RecvError::Lagged`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default buffer capacity for event buses.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// ============================================================================
// Queue Event
// ============================================================================

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueEventKind {
    Enqueue,
    Dequeue,
    Start,
    Complete,
    Error,
    Cancel,
}

impl QueueEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Dequeue => "dequeue",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancel => "cancel",
        }
    }
}

/// A lifecycle event for one unit in one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    pub kind: QueueEventKind,
    pub session_key: String,
    pub unit_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl QueueEvent {
    pub fn new(kind: QueueEventKind, session_key: &str, unit_id: &str) -> Self {
        Self {
            kind,
            session_key: session_key.to_string(),
            unit_id: unit_id.to_string(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel for queue events. Cheap to clone; clones share subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: QueueEvent) {
        trace!(
            kind = event.kind.as_str(),
            session_key = %event.session_key,
            unit_id = %event.unit_id,
            subscribers = self.tx.receiver_count(),
            "Queue event"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
