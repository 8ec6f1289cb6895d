//! Common test utilities.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::extract::connect_info::MockConnectInfo;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use injectq::executor::InjectExecutor;
use injectq::queue::{
    ExecutorError, InjectOptions, InjectOutput, InjectPayload, QueueManager, QueueManagerConfig,
};
use injectq::restart::{
    CoordinatorConfig, DrainCoordinator, RestartError, RestartHook, RestartReason,
};
use injectq::server::{self, AppState};

/// Executor driven by the payload text:
/// - `fail` returns an error
/// - `block` runs until its token is signalled
/// - anything else echoes back as `echo:<text>`
#[derive(Default)]
pub struct ScriptedExecutor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl InjectExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        payload: InjectPayload,
        _options: InjectOptions,
        cancel: CancellationToken,
    ) -> Result<InjectOutput, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match payload.as_text() {
            "fail" => Err("scripted failure".into()),
            "block" => {
                cancel.cancelled().await;
                Err("stopped".into())
            }
            text => Ok(InjectOutput::text(format!("echo:{text}"))),
        }
    }
}

/// Restart hook that only records why it fired.
#[derive(Default)]
pub struct RecordingHook {
    pub reasons: std::sync::Mutex<Vec<RestartReason>>,
}

impl RecordingHook {
    pub fn reasons(&self) -> Vec<RestartReason> {
        self.reasons.lock().unwrap().clone()
    }
}

#[async_trait]
impl RestartHook for RecordingHook {
    async fn restart(&self, reason: RestartReason) -> Result<(), RestartError> {
        self.reasons.lock().unwrap().push(reason);
        Ok(())
    }
}

pub fn test_manager(max_pending: usize) -> QueueManager {
    QueueManager::new(
        Arc::new(ScriptedExecutor::default()),
        QueueManagerConfig {
            max_pending,
            ..Default::default()
        },
    )
}

/// Create a test `AppState` with no tokens configured.
pub fn test_app_state() -> AppState {
    test_app_state_with(test_manager(8), None, None)
}

pub fn test_app_state_with(
    queues: QueueManager,
    api_token: Option<String>,
    admin_token: Option<String>,
) -> AppState {
    let restart = DrainCoordinator::new(
        Arc::new(queues.clone()),
        Arc::new(RecordingHook::default()),
        CoordinatorConfig::default(),
    );
    let (shutdown_tx, _shutdown_rx) = server::shutdown_channel();
    AppState {
        queues,
        restart,
        admin_token,
        api_token,
        max_connections: 64,
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
    }
}

/// Build the router as seen from `peer`.
pub fn test_app_from(state: AppState, peer: SocketAddr) -> Router {
    server::build_app(state, 300).layer(MockConnectInfo(peer))
}

/// Create a test app reached over loopback.
pub fn test_app() -> Router {
    test_app_from(test_app_state(), loopback())
}

pub fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

pub fn remote() -> SocketAddr {
    SocketAddr::from(([203, 0, 113, 9], 40000))
}
