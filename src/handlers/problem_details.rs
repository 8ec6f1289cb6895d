//! RFC 7807 problem details responses.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

const CONTENT_TYPE: &str = "application/problem+json";

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            problem_type: "about:blank".to_string(),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: Some(detail.into()),
        }
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, [(header::CONTENT_TYPE, CONTENT_TYPE)], Json(self)).into_response()
    }
}

pub fn bad_request(detail: impl Into<String>) -> Response {
    ProblemDetails::new(StatusCode::BAD_REQUEST, detail).into_response()
}

pub fn not_found(detail: impl Into<String>) -> Response {
    ProblemDetails::new(StatusCode::NOT_FOUND, detail).into_response()
}

pub fn conflict(detail: impl Into<String>) -> Response {
    ProblemDetails::new(StatusCode::CONFLICT, detail).into_response()
}

pub fn too_many_requests(detail: impl Into<String>) -> Response {
    ProblemDetails::new(StatusCode::TOO_MANY_REQUESTS, detail).into_response()
}

pub fn bad_gateway(detail: impl Into<String>) -> Response {
    ProblemDetails::new(StatusCode::BAD_GATEWAY, detail).into_response()
}

pub fn service_unavailable(detail: impl Into<String>) -> Response {
    ProblemDetails::new(StatusCode::SERVICE_UNAVAILABLE, detail).into_response()
}

pub fn internal_error(detail: impl Into<String>) -> Response {
    ProblemDetails::new(StatusCode::INTERNAL_SERVER_ERROR, detail).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_details_uses_canonical_title() {
        let problem = ProblemDetails::new(StatusCode::TOO_MANY_REQUESTS, "backlog full");
        assert_eq!(problem.title, "Too Many Requests");
        assert_eq!(problem.status, 429);
        assert_eq!(problem.detail.as_deref(), Some("backlog full"));
    }

    #[test]
    fn response_carries_problem_content_type() {
        let response = not_found("unit not found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );
    }
}
