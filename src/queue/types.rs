//! Shared types for queued injects.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use super::error::QueueError;

// ============================================================================
// ID Prefixes
// ============================================================================

/// ID prefix for queued injects.
pub const INJECT_ID_PREFIX: &str = "inject_";

/// Generate a fresh unit id.
pub fn new_unit_id() -> String {
    format!("{}{}", INJECT_ID_PREFIX, Ulid::new())
}

// ============================================================================
// Payload
// ============================================================================

/// Reference to an auxiliary media item attached to a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Media kind (e.g., "image", "audio", "file").
    pub kind: String,
    /// Where the executor can fetch the media from.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// The content of one inject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InjectPayload {
    Text {
        text: String,
    },
    Multimodal {
        text: String,
        #[serde(default)]
        media: Vec<MediaRef>,
    },
}

impl InjectPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The textual part of the payload.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } | Self::Multimodal { text, .. } => text,
        }
    }

    /// Media references (empty for plain text).
    pub fn media(&self) -> &[MediaRef] {
        match self {
            Self::Text { .. } => &[],
            Self::Multimodal { media, .. } => media,
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Callback invoked by executors that stream partial output.
#[derive(Clone)]
pub struct StreamCallback(Arc<dyn Fn(&str) + Send + Sync>);

impl StreamCallback {
    pub fn new(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, chunk: &str) {
        (self.0)(chunk)
    }
}

impl fmt::Debug for StreamCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamCallback(..)")
    }
}

/// Execution hints attached to an inject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Source channel the inject arrived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Context providers the executor should consult.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_providers: Vec<String>,
    /// Higher values dequeue first. Omitted means 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Suppress side-channel notifications for this inject.
    #[serde(default)]
    pub silent: bool,
    #[serde(skip)]
    pub on_chunk: Option<StreamCallback>,
}

impl InjectOptions {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }
}

// ============================================================================
// Request
// ============================================================================

/// An inject as submitted by a caller, before the queue assigns it an id.
#[derive(Debug, Clone)]
pub struct InjectRequest {
    pub session_key: String,
    pub payload: InjectPayload,
    pub options: InjectOptions,
}

impl InjectRequest {
    pub fn new(session_key: impl Into<String>, payload: InjectPayload) -> Self {
        Self {
            session_key: session_key.into(),
            payload,
            options: InjectOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InjectOptions) -> Self {
        self.options = options;
        self
    }
}

// ============================================================================
// Output
// ============================================================================

/// Result of a successfully executed inject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectOutput {
    pub content: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl InjectOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

// ============================================================================
// Queued / Active Units
// ============================================================================

/// Sender half of a unit's resolution channel.
pub(crate) type Resolver = oneshot::Sender<Result<InjectOutput, QueueError>>;

/// One pending inject waiting in a session backlog.
#[derive(Debug)]
pub struct QueuedInject {
    pub id: String,
    pub session_key: String,
    pub payload: InjectPayload,
    pub options: InjectOptions,
    pub priority: i32,
    pub queued_at: Instant,
    /// Wall-clock submission time, for reporting only.
    pub queued_at_wall: DateTime<Utc>,
    /// Arrival sequence within the session; breaks priority ties.
    pub(crate) seq: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) resolver: Resolver,
}

impl QueuedInject {
    /// Backlog ordering: higher priority first, then arrival order.
    pub(crate) fn order_key(&self) -> (Reverse<i32>, u64) {
        (Reverse(self.priority), self.seq)
    }

    /// Settle the resolution channel. Consumes the unit so it can only happen once.
    pub(crate) fn settle(self, result: Result<InjectOutput, QueueError>) {
        // Receiver may already be gone if the caller stopped waiting.
        let _ = self.resolver.send(result);
    }
}

/// The running inject of a session.
#[derive(Debug, Clone)]
pub struct ActiveInject {
    pub id: String,
    pub session_key: String,
    pub started_at: Instant,
    pub cancel: CancellationToken,
}

// ============================================================================
// Stats
// ============================================================================

/// Read-only snapshot of one session queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub session_key: String,
    /// Backlog depth (the active unit is not counted).
    pub queued: usize,
    pub processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_unit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_queued_age_ms: Option<u64>,
}

impl QueueStats {
    pub fn has_active(&self) -> bool {
        self.active_unit_id.is_some()
    }
}
