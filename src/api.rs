//! Wire types shared by the HTTP handlers and [`crate::client`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::queue::{InjectOptions, InjectPayload, QueueStats};

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyzResponse {
    /// `ok`, or `restarting` once a restart has fired.
    pub status: String,
    pub sessions: usize,
    pub active_injects: usize,
    pub queued_injects: usize,
}

// ============================================================================
// Injects
// ============================================================================

/// Body of `POST /api/v1/sessions/{key}/injects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitInjectRequest {
    pub payload: InjectPayload,
    #[serde(default)]
    pub options: InjectOptions,
}

/// Query string of the submit route. `wait=false` returns as soon as the
/// inject is queued.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitInjectQuery {
    #[serde(default = "default_wait")]
    pub wait: bool,
}

impl Default for SubmitInjectQuery {
    fn default() -> Self {
        Self { wait: true }
    }
}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectResponse {
    pub unit_id: String,
    pub session_key: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedInjectResponse {
    pub unit_id: String,
    pub session_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInjectResponse {
    pub unit_id: String,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSessionResponse {
    pub session_key: String,
    pub cancelled: usize,
}

// ============================================================================
// Queues
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuesResponse {
    pub sessions: usize,
    pub active_injects: usize,
    pub queued_injects: usize,
    pub queues: Vec<QueueStats>,
}

impl QueuesResponse {
    /// Aggregate a stats snapshot.
    pub fn from_stats(queues: Vec<QueueStats>) -> Self {
        Self {
            sessions: queues.len(),
            active_injects: queues.iter().filter(|s| s.has_active()).count(),
            queued_injects: queues.iter().map(|s| s.queued).sum(),
            queues,
        }
    }
}

// ============================================================================
// Restart
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRestartResponse {
    pub cancelled: bool,
}
