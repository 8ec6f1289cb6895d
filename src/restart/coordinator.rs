//! Drain coordinator state machine.
//!
//! `idle -> pending -> draining -> restarting`, with `cancel` leaving
//! `pending`/`draining`. A poll task per scheduled restart samples the
//! activity source; a generation counter retires pollers whose request was
//! cancelled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    ActivitySource, DrainMode, RestartConfig, RestartError, RestartHook, RestartReason,
    RestartRequest, RestartState, RestartStatus,
};

/// Default interval between activity samples.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Applied to fields a request leaves out.
    pub defaults: RestartConfig,
    pub poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            defaults: RestartConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

#[derive(Default)]
struct Tracker {
    state: RestartState,
    requested_at: Option<DateTime<Utc>>,
    requested_instant: Option<Instant>,
    config: Option<RestartConfig>,
    batched_requests: u32,
    /// Start of the current zero-activity stretch.
    idle_since: Option<Instant>,
    generation: u64,
}

impl Tracker {
    fn clear(&mut self, state: RestartState) {
        self.state = state;
        self.requested_at = None;
        self.requested_instant = None;
        self.config = None;
        self.batched_requests = 0;
        self.idle_since = None;
        self.generation += 1;
    }
}

enum Step {
    Wait,
    Stop,
    Fire(RestartReason),
}

// ============================================================================
// Drain Coordinator
// ============================================================================

struct CoordinatorInner {
    activity: Arc<dyn ActivitySource>,
    hook: Arc<dyn RestartHook>,
    config: CoordinatorConfig,
    tracker: Mutex<Tracker>,
}

/// Schedules restarts for moments when no inject work would be lost.
/// Cheap to clone.
#[derive(Clone)]
pub struct DrainCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl DrainCoordinator {
    pub fn new(
        activity: Arc<dyn ActivitySource>,
        hook: Arc<dyn RestartHook>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                activity,
                hook,
                config,
                tracker: Mutex::new(Tracker::default()),
            }),
        }
    }

    /// Schedule a restart, or batch into the one already scheduled.
    pub fn schedule_restart(&self, request: RestartRequest) -> Result<RestartStatus, RestartError> {
        let config = RestartConfig::resolve(&request, &self.inner.config.defaults)?;

        let spawn_generation = {
            let mut t = self.lock();
            match t.state {
                RestartState::Restarting => return Err(RestartError::AlreadyRestarting),
                RestartState::Pending | RestartState::Draining => {
                    t.batched_requests += 1;
                    let merged = t.config.map_or(config, |current| current.merge(&config));
                    t.config = Some(merged);
                    info!(
                        batched_requests = t.batched_requests,
                        idle_threshold_secs = merged.idle_threshold_seconds,
                        max_wait_secs = merged.max_wait_seconds,
                        "Restart request batched into pending restart"
                    );
                    None
                }
                RestartState::Idle | RestartState::Cancelled => {
                    t.clear(RestartState::Pending);
                    t.requested_at = Some(Utc::now());
                    t.requested_instant = Some(Instant::now());
                    t.config = Some(config);
                    t.batched_requests = 1;
                    info!(
                        idle_threshold_secs = config.idle_threshold_seconds,
                        max_wait_secs = config.max_wait_seconds,
                        drain_mode = ?config.drain_mode,
                        "Restart scheduled"
                    );
                    Some(t.generation)
                }
            }
        };

        if let Some(generation) = spawn_generation {
            self.spawn_poller(generation);
        }
        Ok(self.status())
    }

    /// Drop the scheduled restart. Returns false if none was pending.
    pub fn cancel(&self) -> bool {
        let mut t = self.lock();
        if !t.state.is_pending() {
            return false;
        }
        let discarded = t.batched_requests;
        t.clear(RestartState::Cancelled);
        info!(discarded_requests = discarded, "Restart cancelled");
        true
    }

    pub fn status(&self) -> RestartStatus {
        let t = self.lock();
        let now = Instant::now();
        let active = self.inner.activity.active_count();
        let queued = self.inner.activity.queued_count();

        let idle_for = match (t.state.is_pending(), t.idle_since) {
            (true, Some(since)) => now.saturating_duration_since(since),
            _ => Duration::ZERO,
        };
        let estimated_restart_in = match (t.state.is_pending(), t.config, t.requested_instant) {
            (true, Some(config), Some(requested)) => {
                estimate(&config, now.saturating_duration_since(requested), idle_for, active)
            }
            _ => None,
        };

        RestartStatus {
            state: t.state,
            pending: t.state.is_pending(),
            requested_at: t.requested_at,
            config: t.config,
            active_injects: active,
            queued_injects: queued,
            idle_seconds: idle_for.as_secs(),
            estimated_restart_in,
            batched_requests: t.batched_requests,
        }
    }

    pub fn state(&self) -> RestartState {
        self.lock().state
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    fn spawn_poller(&self, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match this.evaluate(generation, Instant::now()) {
                    Step::Wait => {}
                    Step::Stop => {
                        debug!(generation, "Restart poller retired");
                        return;
                    }
                    Step::Fire(reason) => {
                        this.fire(reason).await;
                        return;
                    }
                }
            }
        });
    }

    fn evaluate(&self, generation: u64, now: Instant) -> Step {
        let mut t = self.lock();
        if t.generation != generation || !t.state.is_pending() {
            return Step::Stop;
        }
        let (Some(config), Some(requested)) = (t.config, t.requested_instant) else {
            return Step::Stop;
        };

        let active = self.inner.activity.active_count();
        if active == 0 {
            t.idle_since.get_or_insert(now);
        } else {
            t.idle_since = None;
        }

        let idle_for = t
            .idle_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        if active == 0 && idle_for >= config.idle_threshold() {
            t.state = RestartState::Restarting;
            return Step::Fire(RestartReason::Idle);
        }

        if now.saturating_duration_since(requested) < config.max_wait() {
            return Step::Wait;
        }

        match config.drain_mode {
            DrainMode::Force => {
                let signalled = self.inner.activity.signal_active();
                t.state = RestartState::Restarting;
                Step::Fire(RestartReason::Forced { signalled })
            }
            DrainMode::Graceful if active == 0 => {
                t.state = RestartState::Restarting;
                Step::Fire(RestartReason::Drained)
            }
            DrainMode::Graceful => {
                if t.state == RestartState::Pending {
                    info!(active, "Max wait elapsed, draining active injects");
                    t.state = RestartState::Draining;
                }
                Step::Wait
            }
        }
    }

    async fn fire(&self, reason: RestartReason) {
        let batched = self.lock().batched_requests;
        info!(reason = reason.as_str(), batched_requests = batched, "Restarting");

        if let Err(e) = self.inner.hook.restart(reason).await {
            warn!(error = %e, "Restart hook failed, returning to idle");
            self.lock().clear(RestartState::Idle);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tracker> {
        self.inner
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Seconds until the restart is expected to fire, if knowable.
fn estimate(
    config: &RestartConfig,
    waited: Duration,
    idle_for: Duration,
    active: usize,
) -> Option<u64> {
    let remaining_max = config.max_wait().saturating_sub(waited);
    if active == 0 {
        let remaining_idle = config.idle_threshold().saturating_sub(idle_for);
        Some(remaining_idle.min(remaining_max).as_secs())
    } else if config.drain_mode == DrainMode::Force || !remaining_max.is_zero() {
        Some(remaining_max.as_secs())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct FakeActivity {
        active: AtomicUsize,
        queued: AtomicUsize,
        signalled: AtomicUsize,
    }

    impl FakeActivity {
        fn set_active(&self, n: usize) {
            self.active.store(n, Ordering::SeqCst);
        }
    }

    impl ActivitySource for FakeActivity {
        fn active_count(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }

        fn queued_count(&self) -> usize {
            self.queued.load(Ordering::SeqCst)
        }

        fn signal_active(&self) -> usize {
            let n = self.active.load(Ordering::SeqCst);
            self.signalled.fetch_add(n, Ordering::SeqCst);
            n
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        reasons: Mutex<Vec<RestartReason>>,
        fail: bool,
    }

    impl RecordingHook {
        fn reasons(&self) -> Vec<RestartReason> {
            self.reasons.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RestartHook for RecordingHook {
        async fn restart(&self, reason: RestartReason) -> Result<(), RestartError> {
            self.reasons.lock().unwrap().push(reason);
            if self.fail {
                return Err(RestartError::HookFailed("supervisor unreachable".to_string()));
            }
            Ok(())
        }
    }

    fn setup(active: usize) -> (DrainCoordinator, Arc<FakeActivity>, Arc<RecordingHook>) {
        let activity = Arc::new(FakeActivity::default());
        activity.set_active(active);
        let hook = Arc::new(RecordingHook::default());
        let coordinator =
            DrainCoordinator::new(activity.clone(), hook.clone(), CoordinatorConfig::default());
        (coordinator, activity, hook)
    }

    fn request(idle: u64, max_wait: u64, mode: DrainMode) -> RestartRequest {
        RestartRequest {
            idle_threshold_seconds: Some(idle),
            max_wait_seconds: Some(max_wait),
            drain_mode: Some(mode),
        }
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_idle_window() {
        let (coordinator, _activity, hook) = setup(0);

        let status = coordinator
            .schedule_restart(request(5, 60, DrainMode::Graceful))
            .unwrap();
        assert!(status.pending);
        assert_eq!(status.state, RestartState::Pending);
        assert_eq!(status.batched_requests, 1);
        assert!(status.requested_at.is_some());

        sleep_secs(4).await;
        assert_eq!(coordinator.state(), RestartState::Pending);
        assert!(hook.reasons().is_empty());

        sleep_secs(2).await;
        assert_eq!(coordinator.state(), RestartState::Restarting);
        assert_eq!(hook.reasons(), vec![RestartReason::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_idle_window() {
        let (coordinator, activity, hook) = setup(1);
        coordinator
            .schedule_restart(request(5, 120, DrainMode::Graceful))
            .unwrap();

        sleep_secs(10).await;
        assert_eq!(coordinator.state(), RestartState::Pending);

        activity.set_active(0);
        sleep_secs(3).await;
        activity.set_active(1);
        sleep_secs(1).await;
        activity.set_active(0);
        sleep_secs(4).await;
        assert_eq!(coordinator.state(), RestartState::Pending);
        assert!(coordinator.status().idle_seconds <= 4);

        sleep_secs(2).await;
        assert_eq!(hook.reasons(), vec![RestartReason::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_are_batched_into_one_restart() {
        let (coordinator, _activity, hook) = setup(0);

        coordinator
            .schedule_restart(RestartRequest {
                idle_threshold_seconds: Some(5),
                ..Default::default()
            })
            .unwrap();
        let status = coordinator
            .schedule_restart(RestartRequest {
                idle_threshold_seconds: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(status.batched_requests, 2);

        sleep_secs(30).await;
        assert_eq!(hook.reasons().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_mode_signals_active_after_max_wait() {
        let (coordinator, activity, hook) = setup(1);
        coordinator
            .schedule_restart(request(5, 10, DrainMode::Force))
            .unwrap();

        sleep_secs(9).await;
        assert_eq!(coordinator.state(), RestartState::Pending);
        assert_eq!(activity.signalled.load(Ordering::SeqCst), 0);

        sleep_secs(2).await;
        assert_eq!(activity.signalled.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(), RestartState::Restarting);
        assert_eq!(
            hook.reasons(),
            vec![RestartReason::Forced { signalled: 1 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_mode_drains_after_max_wait() {
        let (coordinator, activity, hook) = setup(2);
        coordinator
            .schedule_restart(request(5, 10, DrainMode::Graceful))
            .unwrap();

        sleep_secs(11).await;
        let status = coordinator.status();
        assert_eq!(status.state, RestartState::Draining);
        assert!(status.pending);
        assert!(status.estimated_restart_in.is_none());
        assert!(hook.reasons().is_empty());
        assert_eq!(activity.signalled.load(Ordering::SeqCst), 0);

        activity.set_active(0);
        sleep_secs(1).await;
        assert_eq!(hook.reasons(), vec![RestartReason::Drained]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending_restart() {
        let (coordinator, _activity, hook) = setup(0);
        coordinator
            .schedule_restart(request(5, 60, DrainMode::Graceful))
            .unwrap();
        coordinator
            .schedule_restart(request(5, 60, DrainMode::Graceful))
            .unwrap();

        assert!(coordinator.cancel());
        let status = coordinator.status();
        assert_eq!(status.state, RestartState::Cancelled);
        assert!(!status.pending);
        assert_eq!(status.batched_requests, 0);
        assert!(status.config.is_none());

        sleep_secs(30).await;
        assert!(hook.reasons().is_empty());
        assert!(!coordinator.cancel());

        // A new request after cancellation starts fresh.
        let status = coordinator
            .schedule_restart(request(1, 60, DrainMode::Graceful))
            .unwrap();
        assert_eq!(status.batched_requests, 1);
        sleep_secs(2).await;
        assert_eq!(hook.reasons(), vec![RestartReason::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_while_restarting_is_rejected() {
        let (coordinator, _activity, _hook) = setup(0);
        coordinator
            .schedule_restart(request(0, 10, DrainMode::Graceful))
            .unwrap();
        sleep_secs(1).await;
        assert_eq!(coordinator.state(), RestartState::Restarting);

        assert!(matches!(
            coordinator.schedule_restart(RestartRequest::default()),
            Err(RestartError::AlreadyRestarting)
        ));
        assert!(!coordinator.cancel());
    }

    #[tokio::test]
    async fn invalid_request_leaves_state_untouched() {
        let (coordinator, _activity, _hook) = setup(0);
        let err = coordinator
            .schedule_restart(request(30, 10, DrainMode::Graceful))
            .unwrap_err();
        assert!(matches!(err, RestartError::InvalidRequest(_)));
        assert_eq!(coordinator.state(), RestartState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_hook_returns_to_idle() {
        let activity = Arc::new(FakeActivity::default());
        let hook = Arc::new(RecordingHook {
            fail: true,
            ..Default::default()
        });
        let coordinator =
            DrainCoordinator::new(activity, hook.clone(), CoordinatorConfig::default());

        coordinator
            .schedule_restart(request(1, 10, DrainMode::Graceful))
            .unwrap();
        sleep_secs(3).await;

        assert_eq!(hook.reasons().len(), 1);
        assert_eq!(coordinator.state(), RestartState::Idle);
        assert!(coordinator.schedule_restart(RestartRequest::default()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn status_estimates_time_remaining() {
        let (coordinator, activity, _hook) = setup(1);
        activity.queued.store(3, Ordering::SeqCst);
        let status = coordinator
            .schedule_restart(request(5, 60, DrainMode::Graceful))
            .unwrap();
        assert_eq!(status.active_injects, 1);
        assert_eq!(status.queued_injects, 3);
        assert_eq!(status.estimated_restart_in, Some(60));

        sleep_secs(20).await;
        activity.set_active(0);
        sleep_secs(2).await;
        let status = coordinator.status();
        assert_eq!(status.active_injects, 0);
        let eta = status.estimated_restart_in.unwrap();
        assert!(eta <= 5, "eta was {eta}");
        assert_eq!(
            status.config.unwrap(),
            RestartConfig {
                idle_threshold_seconds: 5,
                max_wait_seconds: 60,
                drain_mode: DrainMode::Graceful,
            }
        );
    }

    #[test]
    fn estimate_is_unknown_when_draining_gracefully() {
        let config = RestartConfig {
            idle_threshold_seconds: 5,
            max_wait_seconds: 10,
            drain_mode: DrainMode::Graceful,
        };
        assert_eq!(estimate(&config, Duration::from_secs(12), Duration::ZERO, 1), None);
        assert_eq!(
            estimate(&config, Duration::from_secs(2), Duration::from_secs(1), 0),
            Some(4)
        );
        let force = RestartConfig {
            drain_mode: DrainMode::Force,
            ..config
        };
        assert_eq!(estimate(&force, Duration::from_secs(12), Duration::ZERO, 1), Some(0));
    }
}
