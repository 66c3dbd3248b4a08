//! HTTP surface tests driven through `tower::ServiceExt::oneshot`

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use gate_bridge::router;
use gate_core::{actuator::DryRunActuator, Config, GateService};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    gate: GateService,
    sink: DryRunActuator,
    _temp: TempDir,
}

fn create_test_app() -> TestApp {
    let temp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp.path().join("gate");

    let sink = DryRunActuator::new();
    let gate = GateService::open(config, Arc::new(sink.clone())).unwrap();

    TestApp {
        app: router(gate.clone()),
        gate,
        sink,
        _temp: temp,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(app, Request::get(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_event(app: &Router, body: &'static str) -> (StatusCode, Value) {
    let request = Request::post("/event")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_status_after_boot() {
    let t = create_test_app();

    let (status, json) = get_json(&t.app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["system"], "HBCE BRIDGE");
    assert_eq!(json["last_applied_event_id"], 0);
    assert_eq!(json["state"]["gate"], "DENIED");
    assert_eq!(json["state"]["mode"], "HOLD");
    assert_eq!(json["state"]["estop"], true);
}

#[tokio::test]
async fn test_post_event_accepted() {
    let t = create_test_app();

    let (status, json) = post_event(
        &t.app,
        r#"{"event_id":1,"integrity":"HASH_OK","gate":"ALLOWED","mode":"EXPLORE_SLOW"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["verdict"]["verdict"], "ACCEPTED");
    assert_eq!(json["step"]["outcome"], "EXECUTED");
    assert_eq!(json["step"]["command"], "forward 20");
    assert_eq!(json["state"]["gate"], "DENIED");
    assert_eq!(t.sink.sent(), vec!["forward 20"]);

    let (_, json) = get_json(&t.app, "/status").await;
    assert_eq!(json["last_applied_event_id"], 1);
}

#[tokio::test]
async fn test_post_event_denied_is_still_ok() {
    let t = create_test_app();

    let (status, json) = post_event(&t.app, r#"{"event_id":1,"integrity":"BAD","gate":"ALLOWED"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["verdict"]["verdict"], "DENIED");
    assert_eq!(json["verdict"]["reason"], "INTEGRITY_NOT_OK");
    assert!(json.get("step").is_none());

    let (status, json) = post_event(&t.app, "{oops").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["verdict"]["reason"], "EVENT_INVALID");
    assert_eq!(json["state"]["integrity"], "FAIL");
    assert!(t.sink.sent().is_empty());
}

#[tokio::test]
async fn test_ledger_export_and_verify() {
    let t = create_test_app();
    post_event(
        &t.app,
        r#"{"event_id":4,"integrity":"HASH_OK","gate":"ALLOWED","mode":"FOLLOW_PROXIMITY"}"#,
    )
    .await;

    let (status, ledger) = get_json(&t.app, "/ledger").await;
    assert_eq!(status, StatusCode::OK);
    let entries = ledger.as_array().unwrap();
    assert_eq!(entries[0]["kind"], "BOOT");
    let kinds: Vec<&str> = entries.iter().map(|e| e["kind"].as_str().unwrap()).collect();
    assert!(kinds.contains(&"STATE_ACCEPT"));
    assert!(kinds.contains(&"POST_STEP_FORCED_HALT"));

    let response = t
        .app
        .clone()
        .oneshot(Request::get("/ledger/export").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/x-ndjson"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let lines: Vec<&[u8]> = body.split(|b| *b == b'\n').filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), entries.len());

    let last = t.gate.read_ledger().unwrap().pop().unwrap();
    assert_eq!(last.kind, gate_core::EntryKind::LedgerExport);

    let (status, verify) = get_json(&t.app, "/ledger/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verify["ok"], true);
    assert_eq!(verify["entries"], entries.len() as u64 + 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = create_test_app();
    post_event(&t.app, r#"{"estop":true}"#).await;

    let (status, body) = send(&t.app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("gate_events_total 1"));
    assert!(text.contains("ESTOP_OVERRIDE"));
}

#[tokio::test]
async fn test_unknown_route_not_found() {
    let t = create_test_app();

    let (status, body) = send(&t.app, Request::get("/nope").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"not found");
}

#[tokio::test]
async fn test_stopped_gate_is_unavailable() {
    let t = create_test_app();
    t.gate.shutdown().await.unwrap();

    let (status, json) = get_json(&t.app, "/status").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"].as_str().unwrap().contains("Concurrency"));
}
