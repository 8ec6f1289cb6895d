use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use tokio::sync::{Mutex, oneshot};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::warn;

use crate::handlers;
use crate::queue::QueueManager;
use crate::restart::DrainCoordinator;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub queues: QueueManager,
    pub restart: DrainCoordinator,
    pub admin_token: Option<String>,
    pub api_token: Option<String>,
    pub max_connections: usize,
    pub shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

// ============================================================================
// Server Setup
// ============================================================================

/// Create a shutdown channel pair.
///
/// Returns (sender for AppState, receiver for shutdown_signal).
pub fn shutdown_channel() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
    oneshot::channel()
}

/// Resolve once `signal` fires and every session queue has been shut down.
///
/// Handed to axum's graceful shutdown: submits held open for their inject
/// settle first, so the in-flight request drain can finish.
pub async fn close_queues_on<F>(signal: F, queues: QueueManager, grace: Duration)
where
    F: Future<Output = ()>,
{
    signal.await;
    let dropped = queues.shutdown(grace).await;
    if dropped > 0 {
        warn!(dropped, "Queued injects dropped at shutdown");
    }
}

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;

    // Submission waits for the inject to settle - no request timeout
    let submit_routes = Router::new()
        .route(
            "/sessions/{session_key}/injects",
            post(handlers::v1::submit_inject).delete(handlers::v1::cancel_session),
        )
        .with_state(state.clone());

    let api_routes = Router::new()
        .route(
            "/sessions/{session_key}/injects/{unit_id}",
            delete(handlers::v1::cancel_inject),
        )
        .route("/queues", get(handlers::v1::list_queues))
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    let api_v1 = Router::new()
        .merge(submit_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            handlers::api_auth::require_api_token,
        ))
        .layer(ConcurrencyLimitLayer::new(max_connections));

    let admin_routes = Router::new()
        .route("/shutdown", post(handlers::shutdown))
        .route(
            "/restart",
            post(handlers::admin::schedule_restart)
                .get(handlers::admin::restart_status)
                .delete(handlers::admin::cancel_restart),
        )
        .with_state(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            handlers::api_auth::require_admin_token,
        ));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .with_state(state)
        .nest("/api/v1", api_v1)
        .nest("/api/admin/v1", admin_routes)
}
