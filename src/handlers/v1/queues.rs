use axum::Json;
use axum::extract::State;

use crate::api::QueuesResponse;
use crate::server::AppState;

/// GET /api/v1/queues
pub async fn list_queues(State(state): State<AppState>) -> Json<QueuesResponse> {
    Json(QueuesResponse::from_stats(state.queues.stats_all()))
}
