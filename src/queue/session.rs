//! Per-session inject queue.
//!
//! Each session key gets one [`SessionQueue`]. At most one unit is active at a
//! time; the rest wait in a backlog ordered by `(priority desc, arrival asc)`.
//! When a unit is promoted on an idle queue, a processing task is spawned that
//! runs the active unit, settles it, and keeps promoting backlog entries until
//! the backlog is empty. There is one such task per busy session and none for
//! idle ones.
//!
//! Submission, cancellation and stats never await: the backlog lives behind a
//! short synchronous lock.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
// std::sync::Mutex is correct here—lock is never held across .await points.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{QueueError, QueueResult};
use super::events::{EventBus, QueueEvent, QueueEventKind};
use super::types::{
    ActiveInject, InjectOutput, InjectRequest, QueueStats, QueuedInject, new_unit_id,
};
use crate::executor::InjectExecutor;

/// Default backlog bound per session.
pub const DEFAULT_MAX_PENDING: usize = 64;

// ============================================================================
// Inject Handle
// ============================================================================

/// Future resolving to the outcome of one submitted inject.
///
/// Dropping the handle does not cancel the inject; use
/// [`SessionQueue::cancel`] with [`InjectHandle::id`] for that.
#[derive(Debug)]
pub struct InjectHandle {
    id: String,
    session_key: String,
    rx: oneshot::Receiver<QueueResult<InjectOutput>>,
}

impl InjectHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }
}

impl Future for InjectHandle {
    type Output = QueueResult<InjectOutput>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(QueueError::Closed {
                    session_key: this.session_key.clone(),
                })
            })
        })
    }
}

// ============================================================================
// Session Queue
// ============================================================================

struct SessionQueueInner {
    /// Waiting units, kept sorted by (priority desc, seq asc).
    backlog: VecDeque<QueuedInject>,
    active: Option<ActiveInject>,
    /// True while a processing task owns the session.
    processing: bool,
    closed: bool,
    next_seq: u64,
    last_activity: Instant,
}

/// Ordered backlog plus the single in-flight unit for one session key.
pub struct SessionQueue {
    session_key: String,
    inner: Mutex<SessionQueueInner>,
    executor: Arc<dyn InjectExecutor>,
    max_pending: usize,
    events: EventBus,
    /// Manager-level bus every event is forwarded to.
    upstream: Option<EventBus>,
    idle_tx: watch::Sender<bool>,
}

impl SessionQueue {
    pub fn new(
        session_key: impl Into<String>,
        executor: Arc<dyn InjectExecutor>,
        max_pending: usize,
    ) -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            session_key: session_key.into(),
            inner: Mutex::new(SessionQueueInner {
                backlog: VecDeque::new(),
                active: None,
                processing: false,
                closed: false,
                next_seq: 0,
                last_activity: Instant::now(),
            }),
            executor,
            max_pending,
            events: EventBus::default(),
            upstream: None,
            idle_tx,
        }
    }

    /// Forward every event of this queue to `bus` as well.
    pub fn with_upstream(mut self, bus: EventBus) -> Self {
        self.upstream = Some(bus);
        self
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Subscribe to this session's events only.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Add an inject to the backlog.
    ///
    /// If the session is idle the unit is promoted to active right away and a
    /// processing task is spawned. Never waits on the executor; the returned
    /// handle resolves when the unit settles.
    pub fn submit(self: &Arc<Self>, request: InjectRequest) -> QueueResult<InjectHandle> {
        if request.session_key != self.session_key {
            return Err(QueueError::SessionMismatch {
                expected: self.session_key.clone(),
                found: request.session_key,
            });
        }

        let (resolver, rx) = oneshot::channel();
        let id = new_unit_id();
        let priority = request.options.effective_priority();

        let promoted = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(QueueError::Closed {
                    session_key: self.session_key.clone(),
                });
            }
            // The active unit does not count toward the bound.
            if inner.processing && inner.backlog.len() >= self.max_pending {
                return Err(QueueError::BacklogFull {
                    session_key: self.session_key.clone(),
                    limit: self.max_pending,
                });
            }

            let seq = inner.next_seq;
            inner.next_seq += 1;
            let now = Instant::now();
            inner.last_activity = now;

            self.emit(
                QueueEvent::new(QueueEventKind::Enqueue, &self.session_key, &id).with_data(json!({
                    "priority": priority,
                    "silent": request.options.silent,
                })),
            );

            let unit = QueuedInject {
                id: id.clone(),
                session_key: self.session_key.clone(),
                payload: request.payload,
                options: request.options,
                priority,
                queued_at: now,
                queued_at_wall: Utc::now(),
                seq,
                cancel: CancellationToken::new(),
                resolver,
            };
            let key = unit.order_key();
            let pos = inner.backlog.partition_point(|u| u.order_key() < key);
            inner.backlog.insert(pos, unit);

            if inner.processing {
                None
            } else {
                let next = self.promote_next(&mut inner);
                if next.is_some() {
                    inner.processing = true;
                    self.idle_tx.send_replace(false);
                }
                next
            }
        };

        debug!(
            session_key = %self.session_key,
            unit_id = %id,
            priority,
            started = promoted.is_some(),
            "Inject submitted"
        );

        if let Some(unit) = promoted {
            tokio::spawn(Arc::clone(self).run(unit));
        }

        Ok(InjectHandle {
            id,
            session_key: self.session_key.clone(),
            rx,
        })
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    /// Cancel one unit.
    ///
    /// A backlog unit is removed and rejected with `Cancelled` without ever
    /// running. The active unit only has its token signalled; the executor
    /// decides when to stop. Returns false if no unit has this id.
    pub fn cancel(&self, unit_id: &str) -> bool {
        let mut inner = self.lock();

        if let Some(pos) = inner.backlog.iter().position(|u| u.id == unit_id)
            && let Some(unit) = inner.backlog.remove(pos)
        {
            drop(inner);
            self.reject_cancelled(unit);
            return true;
        }

        match inner.active.as_ref() {
            Some(active) if active.id == unit_id => {
                self.signal(active);
                true
            }
            _ => false,
        }
    }

    /// Cancel every backlog unit. The active unit keeps running.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.lock().backlog.drain(..).collect();
        let count = drained.len();
        for unit in drained {
            self.reject_cancelled(unit);
        }
        if count > 0 {
            debug!(session_key = %self.session_key, count, "Cancelled session backlog");
        }
        count
    }

    /// Signal the active unit's token, if any. Returns whether one was signalled.
    pub fn signal_active(&self) -> bool {
        let inner = self.lock();
        match inner.active.as_ref() {
            Some(active) => self.signal(active),
            None => false,
        }
    }

    /// Close the queue.
    ///
    /// Backlog units are rejected with `Shutdown`, the active unit is
    /// signalled, and further submissions fail with `Closed`. Returns the
    /// number of backlog units rejected.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.lock();
            inner.closed = true;
            if let Some(active) = inner.active.as_ref() {
                self.signal(active);
            }
            inner.backlog.drain(..).collect()
        };

        let count = drained.len();
        for unit in drained {
            self.emit(
                QueueEvent::new(QueueEventKind::Cancel, &self.session_key, &unit.id)
                    .with_data(json!({ "active": false, "shutdown": true })),
            );
            let err = QueueError::shutdown(&self.session_key, &unit.id);
            unit.settle(Err(err));
        }
        count
    }

    /// Resolve once no processing task owns the session.
    pub async fn wait_idle(&self) {
        let mut rx = self.idle_tx.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let now = Instant::now();
        let oldest = inner.backlog.iter().min_by_key(|u| u.queued_at);

        QueueStats {
            session_key: self.session_key.clone(),
            queued: inner.backlog.len(),
            processing: inner.processing,
            active_unit_id: inner.active.as_ref().map(|a| a.id.clone()),
            active_duration_ms: inner
                .active
                .as_ref()
                .map(|a| millis(now.saturating_duration_since(a.started_at))),
            oldest_queued_at: oldest.map(|u| u.queued_at_wall),
            oldest_queued_age_ms: oldest.map(|u| millis(now.saturating_duration_since(u.queued_at))),
        }
    }

    /// True when nothing is queued or running and the queue has been quiet
    /// for at least `grace`.
    pub fn is_reapable(&self, grace: Duration) -> bool {
        let inner = self.lock();
        !inner.processing
            && inner.active.is_none()
            && inner.backlog.is_empty()
            && inner.last_activity.elapsed() >= grace
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    /// Processing sequence for this session: runs units until the backlog is empty.
    async fn run(self: Arc<Self>, first: QueuedInject) {
        let mut current = Some(first);
        while let Some(unit) = current.take() {
            self.execute(unit).await;
            current = self.advance();
        }
        debug!(session_key = %self.session_key, "Session queue idle");
    }

    async fn execute(&self, unit: QueuedInject) {
        let QueuedInject {
            id,
            payload,
            options,
            cancel,
            resolver,
            ..
        } = unit;
        let started = Instant::now();

        let result = AssertUnwindSafe(self.executor.execute(payload, options, cancel.clone()))
            .catch_unwind()
            .await;
        let duration_ms = millis(started.elapsed());
        let key = self.session_key.as_str();

        let outcome = match result {
            Ok(Ok(output)) => {
                debug!(session_key = %key, unit_id = %id, duration_ms, "Inject completed");
                self.emit(
                    QueueEvent::new(QueueEventKind::Complete, key, &id)
                        .with_data(json!({ "durationMs": duration_ms })),
                );
                Ok(output)
            }
            Ok(Err(e)) if cancel.is_cancelled() => {
                debug!(session_key = %key, unit_id = %id, error = %e, "Inject stopped after cancellation");
                self.emit(
                    QueueEvent::new(QueueEventKind::Error, key, &id).with_data(json!({
                        "durationMs": duration_ms,
                        "cancelled": true,
                    })),
                );
                if self.is_closed() {
                    Err(QueueError::shutdown(key, &id))
                } else {
                    Err(QueueError::cancelled(key, &id))
                }
            }
            Ok(Err(e)) => {
                warn!(session_key = %key, unit_id = %id, error = %e, "Inject failed");
                self.emit(
                    QueueEvent::new(QueueEventKind::Error, key, &id).with_data(json!({
                        "durationMs": duration_ms,
                        "error": e.to_string(),
                    })),
                );
                Err(QueueError::execution_failed(key, &id, e))
            }
            Err(_) => {
                warn!(session_key = %key, unit_id = %id, "Executor panicked");
                self.emit(
                    QueueEvent::new(QueueEventKind::Error, key, &id).with_data(json!({
                        "durationMs": duration_ms,
                        "error": "executor panicked",
                    })),
                );
                Err(QueueError::execution_failed(key, &id, "executor panicked".into()))
            }
        };

        let _ = resolver.send(outcome);
    }

    /// Clear the active slot and promote the next backlog unit, or go idle.
    fn advance(&self) -> Option<QueuedInject> {
        let mut inner = self.lock();
        inner.active = None;
        inner.last_activity = Instant::now();

        let next = self.promote_next(&mut inner);
        if next.is_none() {
            inner.processing = false;
            self.idle_tx.send_replace(true);
        }
        next
    }

    fn promote_next(&self, inner: &mut SessionQueueInner) -> Option<QueuedInject> {
        let unit = inner.backlog.pop_front()?;
        inner.active = Some(ActiveInject {
            id: unit.id.clone(),
            session_key: self.session_key.clone(),
            started_at: Instant::now(),
            cancel: unit.cancel.clone(),
        });

        let waited_ms = millis(unit.queued_at.elapsed());
        self.emit(
            QueueEvent::new(QueueEventKind::Dequeue, &self.session_key, &unit.id)
                .with_data(json!({ "waitedMs": waited_ms })),
        );
        self.emit(QueueEvent::new(
            QueueEventKind::Start,
            &self.session_key,
            &unit.id,
        ));
        Some(unit)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Signal an active unit once. Returns false if it was already signalled.
    fn signal(&self, active: &ActiveInject) -> bool {
        if active.cancel.is_cancelled() {
            return false;
        }
        active.cancel.cancel();
        debug!(session_key = %self.session_key, unit_id = %active.id, "Signalled active inject");
        self.emit(
            QueueEvent::new(QueueEventKind::Cancel, &self.session_key, &active.id)
                .with_data(json!({ "active": true })),
        );
        true
    }

    fn reject_cancelled(&self, unit: QueuedInject) {
        debug!(session_key = %self.session_key, unit_id = %unit.id, "Cancelled queued inject");
        self.emit(
            QueueEvent::new(QueueEventKind::Cancel, &self.session_key, &unit.id)
                .with_data(json!({ "active": false })),
        );
        let err = QueueError::cancelled(&self.session_key, &unit.id);
        unit.settle(Err(err));
    }

    fn emit(&self, event: QueueEvent) {
        if let Some(upstream) = &self.upstream {
            upstream.emit(event.clone());
        }
        self.events.emit(event);
    }

    fn lock(&self) -> MutexGuard<'_, SessionQueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
