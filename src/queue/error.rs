//! Queue error types.

use thiserror::Error;

/// Error returned by an executor. The original error is preserved as the cause.
pub type ExecutorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced to submitters of an inject.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The unit was removed from the backlog or signalled while running.
    #[error("inject {unit_id} in session {session_key} was cancelled")]
    Cancelled { session_key: String, unit_id: String },

    /// The executor rejected the unit.
    #[error("inject {unit_id} in session {session_key} failed: {source}")]
    ExecutionFailed {
        session_key: String,
        unit_id: String,
        #[source]
        source: ExecutorError,
    },

    /// The session backlog is at capacity.
    #[error("session {session_key} backlog is full ({limit} pending)")]
    BacklogFull { session_key: String, limit: usize },

    /// A unit was submitted to a queue owned by another session.
    #[error("inject for session {found} submitted to queue for {expected}")]
    SessionMismatch { expected: String, found: String },

    /// The queue shut down before the unit could run.
    #[error("inject {unit_id} in session {session_key} was dropped by queue shutdown")]
    Shutdown { session_key: String, unit_id: String },

    /// The queue no longer accepts submissions.
    #[error("queue for session {session_key} is closed")]
    Closed { session_key: String },
}

impl QueueError {
    pub fn cancelled(session_key: impl Into<String>, unit_id: impl Into<String>) -> Self {
        Self::Cancelled {
            session_key: session_key.into(),
            unit_id: unit_id.into(),
        }
    }

    pub fn execution_failed(
        session_key: impl Into<String>,
        unit_id: impl Into<String>,
        source: ExecutorError,
    ) -> Self {
        Self::ExecutionFailed {
            session_key: session_key.into(),
            unit_id: unit_id.into(),
            source,
        }
    }

    pub fn shutdown(session_key: impl Into<String>, unit_id: impl Into<String>) -> Self {
        Self::Shutdown {
            session_key: session_key.into(),
            unit_id: unit_id.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Convenience type alias for queue results.
pub type QueueResult<T> = Result<T, QueueError>;
