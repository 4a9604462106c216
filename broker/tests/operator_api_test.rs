//! Operator-face integration tests: queue inspection, claim, disposition
//! variants, drafts, and mode control over HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use broker::actors::draft::{DraftClient, ScriptedDraftClient};
use broker::actors::trail::MemoryTrailSink;
use broker::api;
use shared_types::CopilotMode;

async fn setup_test_app(
    mode: CopilotMode,
    client: Arc<dyn DraftClient>,
) -> (axum::Router, Arc<MemoryTrailSink>) {
    let sink = Arc::new(MemoryTrailSink::default());
    let state = broker::spawn_system(
        client,
        sink.clone(),
        mode,
        Duration::from_secs(5),
        "human".to_string(),
    )
    .await
    .expect("Failed to spawn actor system");

    (api::router().with_state(state), sink)
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("Invalid JSON response");
    (status, value)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    json_response(app, req).await
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    json_response(app, req).await
}

/// Fire a client completion in the background and wait for the queue.
async fn start_client_turn(app: &axum::Router, prompt: &str) -> (tokio::task::JoinHandle<Value>, String) {
    let client_app = app.clone();
    let body = json!({
        "model": "human",
        "messages": [{"role": "user", "content": prompt}],
        "stream": false,
    });
    let task = tokio::spawn(async move {
        let (_, response) = post_json(&client_app, "/v1/chat/completions", body).await;
        response
    });

    for _ in 0..200 {
        let (_, body) = get(app, "/operator/queue/current").await;
        if let Some(turn_id) = body["data"]["turn_id"].as_str() {
            return (task, turn_id.to_string());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("turn never appeared in the queue");
}

#[tokio::test]
async fn test_queue_claim_submit_lifecycle() {
    let client = Arc::new(ScriptedDraftClient::always("unused"));
    let (app, _sink) = setup_test_app(CopilotMode::Disabled, client).await;

    let (task, turn_id) = start_client_turn(&app, "Do you ship to Norway?").await;

    let (status, body) = get(&app, "/operator/queue").await;
    assert_eq!(status, StatusCode::OK);
    let queue = body["data"].as_array().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0]["state"], "queued");
    assert_eq!(queue[0]["preview"], "Do you ship to Norway?");
    assert_eq!(queue[0]["mode"], "disabled");

    let (status, body) = post_json(&app, &format!("/operator/turns/{turn_id}/claim"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "claimed");

    let (status, body) = get(&app, &format!("/operator/turns/{turn_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["messages"][0]["content"], "Do you ship to Norway?");

    let (status, body) = post_json(
        &app,
        &format!("/operator/turns/{turn_id}/submit"),
        json!({"text": "Yes, we ship worldwide."}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "delivered");

    let response = task.await.unwrap();
    assert_eq!(
        response["choices"][0]["message"]["content"],
        "Yes, we ship worldwide."
    );

    let (_, body) = get(&app, "/operator/queue").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_append_and_finish_disposition() {
    let client = Arc::new(ScriptedDraftClient::always("unused"));
    let (app, sink) = setup_test_app(CopilotMode::Disabled, client).await;

    let (task, turn_id) = start_client_turn(&app, "hi").await;

    for delta in ["Typed ", "piece ", "by piece."] {
        let (status, body) = post_json(
            &app,
            &format!("/operator/turns/{turn_id}/append"),
            json!({"delta": delta}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["outcome"], "delivered");
    }

    let (status, body) =
        post_json(&app, &format!("/operator/turns/{turn_id}/finish"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "delivered");

    let response = task.await.unwrap();
    assert_eq!(
        response["choices"][0]["message"]["content"],
        "Typed piece by piece."
    );

    for _ in 0..100 {
        if !sink.records().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let records = sink.records();
    assert_eq!(records[0].final_text.as_deref(), Some("Typed piece by piece."));
}

#[tokio::test]
async fn test_submit_unknown_turn_not_found() {
    let client = Arc::new(ScriptedDraftClient::always("unused"));
    let (app, _sink) = setup_test_app(CopilotMode::Disabled, client).await;

    let (status, body) = post_json(
        &app,
        "/operator/turns/chatcmpl-missing/submit",
        json!({"text": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_empty_submit_rejected() {
    let client = Arc::new(ScriptedDraftClient::always("unused"));
    let (app, _sink) = setup_test_app(CopilotMode::Disabled, client).await;

    let (task, turn_id) = start_client_turn(&app, "hi").await;

    let (status, body) = post_json(
        &app,
        &format!("/operator/turns/{turn_id}/submit"),
        json!({"text": "  "}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    // The turn is still pending; resolve it so the client task ends.
    let (status, _) = post_json(
        &app,
        &format!("/operator/turns/{turn_id}/submit"),
        json!({"text": "real answer"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    task.await.unwrap();
}

#[tokio::test]
async fn test_second_submit_reports_superseded() {
    let client = Arc::new(ScriptedDraftClient::always("unused"));
    let (app, _sink) = setup_test_app(CopilotMode::Disabled, client).await;

    let (task, turn_id) = start_client_turn(&app, "hi").await;

    let (status, body) = post_json(
        &app,
        &format!("/operator/turns/{turn_id}/submit"),
        json!({"text": "first"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "delivered");

    let (status, body) = post_json(
        &app,
        &format!("/operator/turns/{turn_id}/submit"),
        json!({"text": "second"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "superseded");

    let response = task.await.unwrap();
    assert_eq!(response["choices"][0]["message"]["content"], "first");
}

#[tokio::test]
async fn test_draft_appears_in_turn_detail() {
    let client = Arc::new(ScriptedDraftClient::always("Suggested reply."));
    let (app, _sink) = setup_test_app(CopilotMode::Draft, client).await;

    let (task, turn_id) = start_client_turn(&app, "hi").await;

    let mut draft = Value::Null;
    for _ in 0..200 {
        let (_, body) = get(&app, &format!("/operator/turns/{turn_id}")).await;
        if body["data"]["draft"]["status"] == "ready" {
            draft = body["data"]["draft"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(draft["text"], "Suggested reply.");
    assert_eq!(draft["stale"], false);

    // Draft mode never auto-submits; the operator sends it explicitly.
    let (status, _) = post_json(
        &app,
        &format!("/operator/turns/{turn_id}/submit"),
        json!({"text": "Suggested reply."}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    task.await.unwrap();
}

#[tokio::test]
async fn test_regenerate_replaces_draft() {
    let client = Arc::new(ScriptedDraftClient::new(
        vec![Ok("first draft".to_string()), Ok("second draft".to_string())],
        Duration::ZERO,
    ));
    let (app, _sink) = setup_test_app(CopilotMode::Draft, client).await;

    let (task, turn_id) = start_client_turn(&app, "hi").await;

    for _ in 0..200 {
        let (_, body) = get(&app, &format!("/operator/turns/{turn_id}")).await;
        if body["data"]["draft"]["text"] == "first draft" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, _) = post_json(
        &app,
        &format!("/operator/turns/{turn_id}/regenerate"),
        json!({"instruction": "shorter"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let mut regenerated = false;
    for _ in 0..200 {
        let (_, body) = get(&app, &format!("/operator/turns/{turn_id}")).await;
        if body["data"]["draft"]["text"] == "second draft" {
            regenerated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(regenerated);

    let (status, _) = post_json(
        &app,
        &format!("/operator/turns/{turn_id}/submit"),
        json!({"text": "done"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    task.await.unwrap();
}

#[tokio::test]
async fn test_mode_roundtrip() {
    let client = Arc::new(ScriptedDraftClient::always("unused"));
    let (app, _sink) = setup_test_app(CopilotMode::Draft, client).await;

    let (status, body) = get(&app, "/operator/mode").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["mode"], "draft");

    let req = Request::builder()
        .method("PUT")
        .uri("/operator/mode")
        .header("content-type", "application/json")
        .body(Body::from(json!({"mode": "auto"}).to_string()))
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["mode"], "auto");

    let (_, body) = get(&app, "/operator/mode").await;
    assert_eq!(body["data"]["mode"], "auto");
}
