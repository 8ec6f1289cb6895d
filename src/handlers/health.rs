use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::api::ReadyzResponse;
use crate::restart::RestartState;
use crate::server::AppState;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Not ready once a restart has fired or the queues are closing; the
/// process is about to exit.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ReadyzResponse>) {
    let restarting =
        state.restart.state() == RestartState::Restarting || state.queues.is_closed();
    let stats = state.queues.stats_all();
    let body = ReadyzResponse {
        status: if restarting { "restarting" } else { "ok" }.to_string(),
        sessions: stats.len(),
        active_injects: stats.iter().filter(|s| s.has_active()).count(),
        queued_injects: stats.iter().map(|s| s.queued).sum(),
    };
    let status = if restarting {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body))
}
