//! Integration tests for the HTTP API.

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;

use common::{loopback, remote, test_app, test_app_from, test_app_state_with, test_manager};

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn inject_body(text: &str) -> Value {
    json!({ "payload": { "type": "text", "text": text } })
}

/// Submit without waiting and return the unit id.
async fn submit_detached(app: &Router, session: &str, text: &str) -> String {
    let response = send(
        app,
        post_json(
            &format!("/api/v1/sessions/{session}/injects?wait=false"),
            inject_body(text),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await["unitId"]
        .as_str()
        .unwrap()
        .to_string()
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[tokio::test]
async fn test_livez() {
    let app = test_app();

    let response = send(&app, Request::get("/livez").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn test_readyz() {
    let app = test_app();

    let response = send(&app, Request::get("/readyz").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sessions"], 0);
}

#[tokio::test]
async fn test_version() {
    let app = test_app();

    let response = send(&app, Request::get("/version").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["name"], "injectq");
    assert!(json.get("version").is_some());
}

// ============================================================================
// Injects API
// ============================================================================

#[tokio::test]
async fn test_submit_inject_waits_for_output() {
    let app = test_app();

    let response = send(&app, post_json("/api/v1/sessions/s1/injects", inject_body("hello"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["content"], "echo:hello");
    assert_eq!(json["sessionKey"], "s1");
    assert!(json["unitId"].as_str().unwrap().starts_with("inject_"));
}

#[tokio::test]
async fn test_submit_inject_failure_is_bad_gateway() {
    let app = test_app();

    let response = send(&app, post_json("/api/v1/sessions/s1/injects", inject_body("fail"))).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );

    let json = body_json(response).await;
    assert_eq!(json["status"], 502);
    assert!(json["detail"].as_str().unwrap().contains("scripted failure"));

    // The session keeps processing after a failure.
    let response = send(&app, post_json("/api/v1/sessions/s1/injects", inject_body("next"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_submit_inject_rejects_malformed_body() {
    let app = test_app();

    let response = send(
        &app,
        post_json("/api/v1/sessions/s1/injects", json!({ "payload": "nope" })),
    )
    .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_cancel_active_inject() {
    let app = test_app();
    let unit_id = submit_detached(&app, "s1", "block").await;

    let response = send(
        &app,
        Request::delete(format!("/api/v1/sessions/s1/injects/{unit_id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["cancelled"], true);
    assert_eq!(json["unitId"], unit_id.as_str());
}

#[tokio::test]
async fn test_cancelled_waiting_inject_is_conflict() {
    let app = test_app();
    let _blocker = submit_detached(&app, "s1", "block").await;

    // Held open until the backlog unit is cancelled below.
    let waiting = tokio::spawn({
        let app = app.clone();
        async move { send(&app, post_json("/api/v1/sessions/s1/injects", inject_body("later"))).await }
    });

    // Wait for the second unit to reach the backlog.
    for _ in 0..100 {
        let response = send(&app, Request::get("/api/v1/queues").body(Body::empty()).unwrap()).await;
        if body_json(response).await["queuedInjects"] == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = send(
        &app,
        Request::delete("/api/v1/sessions/s1/injects")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["cancelled"], 1);

    let response = waiting.await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_unknown_inject_not_found() {
    let app = test_app();

    let response = send(
        &app,
        Request::delete("/api/v1/sessions/nobody/injects/inject_missing")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["status"], 404);
    assert!(json["detail"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_cancel_unknown_session_returns_zero() {
    let app = test_app();

    let response = send(
        &app,
        Request::delete("/api/v1/sessions/nobody/injects")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["cancelled"], 0);
}

#[tokio::test]
async fn test_backlog_full_is_too_many_requests() {
    let state = test_app_state_with(test_manager(1), None, None);
    let app = test_app_from(state, loopback());

    submit_detached(&app, "s1", "block").await;
    submit_detached(&app, "s1", "queued").await;

    let response = send(
        &app,
        post_json("/api/v1/sessions/s1/injects?wait=false", inject_body("overflow")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other sessions are unaffected.
    submit_detached(&app, "s2", "fine").await;
}

#[tokio::test]
async fn test_submit_after_shutdown_is_unavailable() {
    let state = test_app_state_with(test_manager(8), None, None);
    state.queues.shutdown(Duration::from_secs(1)).await;
    let app = test_app_from(state, loopback());

    let response = send(&app, post_json("/api/v1/sessions/s1/injects", inject_body("late"))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = send(&app, Request::get("/readyz").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Queues API
// ============================================================================

#[tokio::test]
async fn test_list_queues() {
    let app = test_app();
    let active = submit_detached(&app, "busy", "block").await;
    submit_detached(&app, "busy", "waiting").await;

    let response = send(&app, Request::get("/api/v1/queues").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["sessions"], 1);
    assert_eq!(json["activeInjects"], 1);
    assert_eq!(json["queuedInjects"], 1);
    assert_eq!(json["queues"][0]["sessionKey"], "busy");
    assert_eq!(json["queues"][0]["activeUnitId"], active.as_str());
}

// ============================================================================
// Admin API
// ============================================================================

#[tokio::test]
async fn test_restart_schedule_status_cancel() {
    let app = test_app();
    let body = json!({ "idleThresholdSeconds": 300, "maxWaitSeconds": 600 });

    let response = send(&app, post_json("/api/admin/v1/restart", body.clone())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["state"], "pending");
    assert_eq!(json["pending"], true);
    assert_eq!(json["batchedRequests"], 1);
    assert_eq!(json["config"]["drainMode"], "graceful");

    let response = send(&app, post_json("/api/admin/v1/restart", body)).await;
    assert_eq!(body_json(response).await["batchedRequests"], 2);

    let response = send(
        &app,
        Request::get("/api/admin/v1/restart").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["state"], "pending");
    assert_eq!(json["activeInjects"], 0);

    let response = send(
        &app,
        Request::delete("/api/admin/v1/restart").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(body_json(response).await["cancelled"], true);

    let response = send(
        &app,
        Request::get("/api/admin/v1/restart").body(Body::empty()).unwrap(),
    )
    .await;
    let json = body_json(response).await;
    assert_eq!(json["state"], "cancelled");
    assert_eq!(json["pending"], false);
}

#[tokio::test]
async fn test_restart_invalid_request() {
    let app = test_app();

    let response = send(
        &app,
        post_json(
            "/api/admin/v1/restart",
            json!({ "idleThresholdSeconds": 600, "maxWaitSeconds": 60 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        post_json("/api/admin/v1/restart", json!({ "maxWaitSeconds": 0 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Request::post("/api/admin/v1/restart")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_restart_empty_body_uses_defaults() {
    let app = test_app();

    let response = send(
        &app,
        Request::post("/api/admin/v1/restart")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["config"]["idleThresholdSeconds"], 5);
    assert_eq!(json["config"]["maxWaitSeconds"], 300);
}

#[tokio::test]
async fn test_shutdown_once() {
    let app = test_app();

    let response = send(
        &app,
        Request::post("/api/admin/v1/shutdown").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        Request::post("/api/admin/v1/shutdown").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ============================================================================
// Authorization
// ============================================================================

#[tokio::test]
async fn test_remote_requests_need_configured_tokens() {
    let app = test_app_from(
        test_app_state_with(test_manager(8), None, None),
        remote(),
    );

    let response = send(&app, Request::get("/api/v1/queues").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &app,
        Request::get("/api/admin/v1/restart").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Health stays public.
    let response = send(&app, Request::get("/livez").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bearer_tokens() {
    let state = test_app_state_with(
        test_manager(8),
        Some("api-secret".to_string()),
        Some("admin-secret".to_string()),
    );
    let app = test_app_from(state, remote());

    let response = send(
        &app,
        Request::get("/api/v1/queues")
            .header("authorization", "Bearer api-secret")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The API token does not open admin routes.
    let response = send(
        &app,
        Request::get("/api/admin/v1/restart")
            .header("authorization", "Bearer api-secret")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app,
        Request::get("/api/admin/v1/restart")
            .header("authorization", "Bearer admin-secret")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}
