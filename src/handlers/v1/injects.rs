use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::api::{
    AcceptedInjectResponse, CancelInjectResponse, CancelSessionResponse, InjectResponse,
    SubmitInjectQuery, SubmitInjectRequest,
};
use crate::handlers::problem_details;
use crate::queue::QueueError;
use crate::server::AppState;

/// POST /api/v1/sessions/{session_key}/injects
///
/// Queues the inject and, unless `wait=false`, holds the request open until
/// it settles. No request timeout applies to this route.
pub async fn submit_inject(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Query(query): Query<SubmitInjectQuery>,
    Json(req): Json<SubmitInjectRequest>,
) -> Response {
    let handle = match state.queues.enqueue(&session_key, req.payload, req.options) {
        Ok(handle) => handle,
        Err(e) => return queue_error_response(&e),
    };
    let unit_id = handle.id().to_string();

    if !query.wait {
        return (
            StatusCode::ACCEPTED,
            Json(AcceptedInjectResponse {
                unit_id,
                session_key,
            }),
        )
            .into_response();
    }

    match handle.await {
        Ok(output) => Json(InjectResponse {
            unit_id,
            session_key,
            content: output.content,
            metadata: output.metadata,
        })
        .into_response(),
        Err(e) => {
            debug!(session_key = %session_key, unit_id = %unit_id, error = %e, "Inject did not complete");
            queue_error_response(&e)
        }
    }
}

/// DELETE /api/v1/sessions/{session_key}/injects/{unit_id}
pub async fn cancel_inject(
    State(state): State<AppState>,
    Path((session_key, unit_id)): Path<(String, String)>,
) -> Response {
    if !state.queues.cancel(&session_key, &unit_id) {
        return problem_details::not_found(format!(
            "inject '{unit_id}' not found in session '{session_key}'"
        ));
    }
    Json(CancelInjectResponse {
        unit_id,
        cancelled: true,
    })
    .into_response()
}

/// DELETE /api/v1/sessions/{session_key}/injects
///
/// Cancels the session backlog. The active inject keeps running.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Json<CancelSessionResponse> {
    let cancelled = state.queues.cancel_session(&session_key);
    Json(CancelSessionResponse {
        session_key,
        cancelled,
    })
}

fn queue_error_response(err: &QueueError) -> Response {
    match err {
        QueueError::Cancelled { .. } => problem_details::conflict(err.to_string()),
        QueueError::ExecutionFailed { .. } => problem_details::bad_gateway(err.to_string()),
        QueueError::BacklogFull { .. } => problem_details::too_many_requests(err.to_string()),
        QueueError::SessionMismatch { .. } => problem_details::bad_request(err.to_string()),
        QueueError::Shutdown { .. } | QueueError::Closed { .. } => {
            problem_details::service_unavailable(err.to_string())
        }
    }
}
