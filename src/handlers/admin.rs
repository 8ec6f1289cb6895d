//! Admin handlers for server management.
//!
//! Mounted under `/api/admin/v1` behind [`super::api_auth::require_admin_token`].

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::problem_details;
use crate::api::CancelRestartResponse;
use crate::restart::{RestartError, RestartRequest, RestartStatus};
use crate::server::AppState;

/// POST /api/admin/v1/shutdown
///
/// Triggers a graceful server shutdown.
pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(tx) = state.shutdown_tx.lock().await.take() {
        let _ = tx.send(());
        (StatusCode::OK, "Shutdown initiated").into_response()
    } else {
        (StatusCode::CONFLICT, "Shutdown already in progress").into_response()
    }
}

/// POST /api/admin/v1/restart
///
/// Schedules a restart for the next idle window, or batches into the one
/// already scheduled. An empty body uses the configured defaults.
pub async fn schedule_restart(State(state): State<AppState>, body: Bytes) -> Response {
    let request: RestartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RestartRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => return problem_details::bad_request(format!("invalid restart request: {e}")),
        }
    };

    match state.restart.schedule_restart(request) {
        Ok(status) => (StatusCode::ACCEPTED, Json(status)).into_response(),
        Err(e) => restart_error_response(&e),
    }
}

/// GET /api/admin/v1/restart
pub async fn restart_status(State(state): State<AppState>) -> Json<RestartStatus> {
    Json(state.restart.status())
}

/// DELETE /api/admin/v1/restart
pub async fn cancel_restart(State(state): State<AppState>) -> Json<CancelRestartResponse> {
    Json(CancelRestartResponse {
        cancelled: state.restart.cancel(),
    })
}

fn restart_error_response(err: &RestartError) -> Response {
    match err {
        RestartError::InvalidRequest(_) => problem_details::bad_request(err.to_string()),
        RestartError::AlreadyRestarting => problem_details::conflict(err.to_string()),
        RestartError::HookFailed(_) => problem_details::internal_error(err.to_string()),
    }
}
