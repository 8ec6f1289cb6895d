//! Restart-on-idle coordination.
//!
//! A restart request waits until no inject has been active for an idle
//! window, or until a max wait elapses. Concurrent requests are batched into
//! the one already scheduled.

mod coordinator;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueManager;

pub use coordinator::{CoordinatorConfig, DEFAULT_POLL_INTERVAL, DrainCoordinator};

/// Upper bound for `maxWaitSeconds` (one day).
pub const MAX_WAIT_LIMIT_SECS: u64 = 86_400;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("invalid restart request: {0}")]
    InvalidRequest(String),

    #[error("restart already in progress")]
    AlreadyRestarting,

    #[error("restart hook failed: {0}")]
    HookFailed(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// What to do with running injects once the max wait has elapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainMode {
    /// Let active injects finish on their own.
    #[default]
    Graceful,
    /// Signal active injects and restart without waiting further.
    Force,
}

/// Restart request as received from the admin API. Omitted fields take the
/// configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRequest {
    #[serde(default)]
    pub idle_threshold_seconds: Option<u64>,
    #[serde(default)]
    pub max_wait_seconds: Option<u64>,
    #[serde(default)]
    pub drain_mode: Option<DrainMode>,
}

/// Effective configuration of a scheduled restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartConfig {
    pub idle_threshold_seconds: u64,
    pub max_wait_seconds: u64,
    pub drain_mode: DrainMode,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            idle_threshold_seconds: 5,
            max_wait_seconds: 300,
            drain_mode: DrainMode::Graceful,
        }
    }
}

impl RestartConfig {
    /// Fill in a request from `defaults` and validate the result.
    pub fn resolve(request: &RestartRequest, defaults: &RestartConfig) -> Result<Self, RestartError> {
        let config = Self {
            idle_threshold_seconds: request
                .idle_threshold_seconds
                .unwrap_or(defaults.idle_threshold_seconds),
            max_wait_seconds: request.max_wait_seconds.unwrap_or(defaults.max_wait_seconds),
            drain_mode: request.drain_mode.unwrap_or(defaults.drain_mode),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RestartError> {
        if self.max_wait_seconds == 0 {
            return Err(RestartError::InvalidRequest(
                "maxWaitSeconds must be greater than 0".to_string(),
            ));
        }
        if self.max_wait_seconds > MAX_WAIT_LIMIT_SECS {
            return Err(RestartError::InvalidRequest(format!(
                "maxWaitSeconds must be at most {MAX_WAIT_LIMIT_SECS}"
            )));
        }
        if self.idle_threshold_seconds > self.max_wait_seconds {
            return Err(RestartError::InvalidRequest(format!(
                "idleThresholdSeconds ({}) exceeds maxWaitSeconds ({})",
                self.idle_threshold_seconds, self.max_wait_seconds
            )));
        }
        Ok(())
    }

    /// Combine with a request batched into the same restart: the earliest
    /// trigger wins and `force` overrides `graceful`.
    pub fn merge(&self, other: &RestartConfig) -> Self {
        Self {
            idle_threshold_seconds: self.idle_threshold_seconds.min(other.idle_threshold_seconds),
            max_wait_seconds: self.max_wait_seconds.min(other.max_wait_seconds),
            drain_mode: if self.drain_mode == DrainMode::Force || other.drain_mode == DrainMode::Force
            {
                DrainMode::Force
            } else {
                DrainMode::Graceful
            },
        }
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_seconds)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }
}

// ============================================================================
// State / Status
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartState {
    #[default]
    Idle,
    /// Scheduled; waiting for the idle window.
    Pending,
    /// Max wait elapsed in graceful mode; waiting for active injects to finish.
    Draining,
    Restarting,
    /// The last request was cancelled. Accepts new requests like `Idle`.
    Cancelled,
}

impl RestartState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::Draining)
    }
}

/// Snapshot reported by `getStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartStatus {
    pub state: RestartState,
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RestartConfig>,
    pub active_injects: usize,
    pub queued_injects: usize,
    /// How long the system has had no active inject while pending.
    pub idle_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_restart_in: Option<u64>,
    pub batched_requests: u32,
}

/// Why a restart fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// No active inject for the whole idle window.
    Idle,
    /// Max wait elapsed in graceful mode and active injects finished.
    Drained,
    /// Max wait elapsed in force mode; `signalled` active injects were cancelled.
    Forced { signalled: usize },
}

impl RestartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Drained => "drained",
            Self::Forced { .. } => "forced",
        }
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Aggregate activity the coordinator watches.
pub trait ActivitySource: Send + Sync {
    /// Number of injects currently executing.
    fn active_count(&self) -> usize;

    /// Number of injects waiting in backlogs.
    fn queued_count(&self) -> usize;

    /// Signal every active inject to stop. Returns how many were signalled.
    fn signal_active(&self) -> usize;
}

impl ActivitySource for QueueManager {
    fn active_count(&self) -> usize {
        QueueManager::active_count(self)
    }

    fn queued_count(&self) -> usize {
        self.total_queued_count()
    }

    fn signal_active(&self) -> usize {
        self.signal_all_active()
    }
}

/// Performs the actual restart once the coordinator decides it is safe.
#[async_trait]
pub trait RestartHook: Send + Sync {
    async fn restart(&self, reason: RestartReason) -> Result<(), RestartError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_fills_defaults() {
        let defaults = RestartConfig::default();
        let config = RestartConfig::resolve(
            &RestartRequest {
                idle_threshold_seconds: Some(2),
                ..Default::default()
            },
            &defaults,
        )
        .unwrap();
        assert_eq!(config.idle_threshold_seconds, 2);
        assert_eq!(config.max_wait_seconds, defaults.max_wait_seconds);
        assert_eq!(config.drain_mode, DrainMode::Graceful);
    }

    #[test]
    fn resolve_rejects_invalid_windows() {
        let defaults = RestartConfig::default();
        for request in [
            RestartRequest {
                max_wait_seconds: Some(0),
                ..Default::default()
            },
            RestartRequest {
                max_wait_seconds: Some(MAX_WAIT_LIMIT_SECS + 1),
                ..Default::default()
            },
            RestartRequest {
                idle_threshold_seconds: Some(60),
                max_wait_seconds: Some(30),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                RestartConfig::resolve(&request, &defaults),
                Err(RestartError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn merge_takes_earliest_trigger_and_force() {
        let a = RestartConfig {
            idle_threshold_seconds: 10,
            max_wait_seconds: 60,
            drain_mode: DrainMode::Graceful,
        };
        let b = RestartConfig {
            idle_threshold_seconds: 5,
            max_wait_seconds: 120,
            drain_mode: DrainMode::Force,
        };
        let merged = a.merge(&b);
        assert_eq!(merged.idle_threshold_seconds, 5);
        assert_eq!(merged.max_wait_seconds, 60);
        assert_eq!(merged.drain_mode, DrainMode::Force);
    }

    #[test]
    fn request_uses_camel_case() {
        let req: RestartRequest =
            serde_json::from_str(r#"{"idleThresholdSeconds":5,"drainMode":"force"}"#).unwrap();
        assert_eq!(req.idle_threshold_seconds, Some(5));
        assert_eq!(req.drain_mode, Some(DrainMode::Force));
        assert!(req.max_wait_seconds.is_none());
    }
}
