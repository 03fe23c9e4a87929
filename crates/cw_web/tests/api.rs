//! Management API surface tests against an in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use cw_engine::{Engine, EngineConfig, UdpConnector};
use cw_store::Store;
use cw_web::{create_router, AppState};

fn test_router() -> (Router, Store) {
    let store = Store::open_memory().unwrap();
    let engine = Engine::new(
        store.clone(),
        Arc::new(UdpConnector),
        EngineConfig::default(),
        CancellationToken::new(),
    );
    let state = Arc::new(AppState::new(store.clone(), engine));
    (create_router(state), store)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, value: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

fn put_json(uri: &str, value: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_connected_store() {
    let (router, store) = test_router();
    store.load_test_fixtures().unwrap();

    let response = router.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], "connected");
    assert_eq!(body["total_cmts"], 1);
}

#[tokio::test]
async fn cmts_crud_roundtrip() {
    let (router, _store) = test_router();

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/cmts",
            serde_json::json!({
                "name": "Lab",
                "ip_address": "192.0.2.1",
                "community_read": "public",
                "community_write": "private",
                "snmp_version": 2,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    let response = router
        .clone()
        .oneshot(get(&format!("/api/cmts/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "Lab");
    assert_eq!(body["snmp_port"], 161);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/cmts/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .oneshot(get(&format!("/api/cmts/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_cmts_is_rejected_with_field_context() {
    let (router, _store) = test_router();

    let response = router
        .oneshot(post_json(
            "/api/cmts",
            serde_json::json!({
                "name": "Lab",
                "ip_address": "192.0.2.1",
                "community_read": "",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("community_read"));
}

#[tokio::test]
async fn rule_with_bad_criteria_is_rejected() {
    let (router, _store) = test_router();

    let response = router
        .oneshot(post_json(
            "/api/rules",
            serde_json::json!({
                "name": "bad",
                "match_type": "SYSDESCR_REGEX",
                "match_criteria": "{\"pattern\":\"[unclosed\"}",
                "tftp_server_ip": "192.0.2.50",
                "firmware_filename": "fw.bin",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn job_listing_rejects_unknown_status() {
    let (router, _store) = test_router();

    let response = router
        .clone()
        .oneshot(get("/api/jobs?status=EXPLODED"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router.oneshot(get("/api/jobs?status=PENDING")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn retry_of_unknown_job_is_not_found() {
    let (router, _store) = test_router();
    let response = router
        .oneshot(post_json("/api/jobs/999/retry", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn settings_roundtrip_and_audit() {
    let (router, store) = test_router();

    let response = router
        .clone()
        .oneshot(put_json(
            "/api/settings/workers",
            serde_json::json!({ "value": "8" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(get("/api/settings/workers"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["value"], "8");

    let response = router
        .oneshot(get("/api/settings/nonexistent"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Settings changes land in the activity log.
    let events = store.list_activity(10, 0).unwrap();
    assert!(events.iter().any(|e| e.message.contains("workers")));
}

#[tokio::test]
async fn evaluate_trigger_returns_accepted() {
    let (router, _store) = test_router();
    let response = router
        .oneshot(post_json("/api/evaluate", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn dashboard_includes_recent_activity() {
    let (router, store) = test_router();
    store.load_test_fixtures().unwrap();

    let response = router.oneshot(get("/api/dashboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["summary"]["cmts"], 1);
    assert!(body["recent_activity"].is_array());
}

#[tokio::test]
async fn metrics_counts_jobs_by_status() {
    let (router, store) = test_router();
    store.load_test_fixtures().unwrap();

    let response = router.oneshot(get("/api/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["modems"], 1);
    assert_eq!(body["rules"], 1);
    assert!(body["jobs_by_status"].is_object());
}
