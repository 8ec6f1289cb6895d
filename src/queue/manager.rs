//! Registry of session queues.
//!
//! Owns the session key → [`SessionQueue`] map, creates queues on first use,
//! re-broadcasts their events on one fleet-wide bus, and reaps queues that
//! have gone quiet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{QueueError, QueueResult};
use super::events::{DEFAULT_EVENT_CAPACITY, EventBus, QueueEvent};
use super::session::{DEFAULT_MAX_PENDING, InjectHandle, SessionQueue};
use super::types::{InjectOptions, InjectPayload, InjectRequest, QueueStats};
use crate::executor::InjectExecutor;

/// Default grace period before an idle queue is removed.
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(60);

/// Default interval between reaping runs.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct QueueManagerConfig {
    /// Backlog bound per session.
    pub max_pending: usize,
    /// How long a queue must be quiet before it can be reaped.
    pub idle_grace: Duration,
    /// Buffer size of the fleet event bus.
    pub event_capacity: usize,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            idle_grace: DEFAULT_IDLE_GRACE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// ============================================================================
// Queue Manager
// ============================================================================

/// Routes injects to per-session queues. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct QueueManager {
    queues: Arc<DashMap<String, Arc<SessionQueue>>>,
    executor: Arc<dyn InjectExecutor>,
    events: EventBus,
    config: QueueManagerConfig,
    closed: Arc<AtomicBool>,
}

impl QueueManager {
    pub fn new(executor: Arc<dyn InjectExecutor>, config: QueueManagerConfig) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            executor,
            events: EventBus::new(config.event_capacity),
            config,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    // ------------------------------------------------------------------------
    // Submission API
    // ------------------------------------------------------------------------

    /// Submit an inject for `session_key`, creating the session queue on first use.
    pub fn enqueue(
        &self,
        session_key: &str,
        payload: InjectPayload,
        options: InjectOptions,
    ) -> QueueResult<InjectHandle> {
        let request = InjectRequest {
            session_key: session_key.to_string(),
            payload,
            options,
        };

        // Submit while holding the entry guard: the reaper's `remove_if` takes
        // the same shard lock, so it cannot drop this queue between lookup and
        // submit and leave a second queue to be created for the same key. The
        // closed check sits under the same lock so `shutdown` cannot miss a
        // queue created concurrently.
        let entry = self.queues.entry(session_key.to_string());
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed {
                session_key: session_key.to_string(),
            });
        }
        let entry = entry.or_insert_with(|| {
            debug!(session_key = %session_key, "Creating session queue");
            Arc::new(
                SessionQueue::new(session_key, self.executor.clone(), self.config.max_pending)
                    .with_upstream(self.events.clone()),
            )
        });
        entry.value().submit(request)
    }

    /// Cancel one unit. False if the session or unit is unknown.
    pub fn cancel(&self, session_key: &str, unit_id: &str) -> bool {
        self.get(session_key)
            .is_some_and(|queue| queue.cancel(unit_id))
    }

    /// Cancel a session's backlog. Returns how many units were cancelled.
    pub fn cancel_session(&self, session_key: &str) -> usize {
        self.get(session_key)
            .map(|queue| queue.cancel_all())
            .unwrap_or(0)
    }

    pub fn get(&self, session_key: &str) -> Option<Arc<SessionQueue>> {
        self.queues.get(session_key).map(|r| r.value().clone())
    }

    // ------------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------------

    /// Snapshot of every live session queue, ordered by session key.
    pub fn stats_all(&self) -> Vec<QueueStats> {
        let mut stats: Vec<_> = self.snapshot().iter().map(|q| q.stats()).collect();
        stats.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        stats
    }

    /// Number of sessions with a unit currently running.
    pub fn active_count(&self) -> usize {
        self.stats_all().iter().filter(|s| s.has_active()).count()
    }

    /// Total backlog depth across all sessions.
    pub fn total_queued_count(&self) -> usize {
        self.stats_all().iter().map(|s| s.queued).sum()
    }

    /// Signal the active unit of every session. Returns how many were signalled.
    pub fn signal_all_active(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|q| q.signal_active())
            .count()
    }

    /// Subscribe to events from every session.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// True once [`QueueManager::shutdown`] has started.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Reaping
    // ------------------------------------------------------------------------

    /// Remove queues with nothing queued or running that have been quiet for
    /// the idle grace period. Returns the number removed.
    pub fn reap_idle(&self) -> usize {
        let grace = self.config.idle_grace;
        let keys: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();

        keys.iter()
            .filter(|key| {
                self.queues
                    .remove_if(key.as_str(), |_, queue| queue.is_reapable(grace))
                    .is_some()
            })
            .count()
    }

    /// Spawn a background task that reaps idle queues every `interval`.
    ///
    /// The task runs until the runtime shuts down or the handle is aborted.
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip immediate tick
            loop {
                ticker.tick().await;
                let removed = manager.reap_idle();
                if removed > 0 {
                    debug!(
                        removed = removed,
                        remaining = manager.len(),
                        "Reaped idle session queues"
                    );
                }
            }
        })
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Close every queue and wait up to `grace` for running units to settle.
    ///
    /// Backlog units are rejected with `Shutdown`; active units are signalled.
    /// Later submissions fail with `Closed`. Returns the number of backlog
    /// units rejected; repeat calls return 0 immediately.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let queues = self.snapshot();
        let rejected: usize = queues.iter().map(|q| q.shutdown()).sum();
        info!(sessions = queues.len(), rejected, "Shutting down queue manager");

        let settled = join_all(queues.iter().map(|q| q.wait_idle()));
        if tokio::time::timeout(grace, settled).await.is_err() {
            warn!(
                active = self.active_count(),
                grace_secs = grace.as_secs(),
                "Active injects did not settle within shutdown grace"
            );
        }

        self.queues.clear();
        info!("Queue manager shutdown complete");
        rejected
    }

    fn snapshot(&self) -> Vec<Arc<SessionQueue>> {
        self.queues.iter().map(|e| e.value().clone()).collect()
    }
}
