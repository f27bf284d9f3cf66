//! HTTP and WebSocket behaviour against a live in-process server

use futures_util::StreamExt;
use serde_json::{json, Value};
use spantrack_core::{RealtimeMessage, Span, SpanStatus};
use spantrack_store::{MemorySpanStore, SpanStore, SqliteSpanStore};
use spantrack_web::{AppState, Broadcaster, SpansResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_with(store: Arc<dyn SpanStore>) -> (String, Arc<AppState>) {
    let state = Arc::new(AppState::new(store, Broadcaster::new(64)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(spantrack_web::serve(
        listener,
        Arc::clone(&state),
        std::future::pending(),
    ));
    (format!("http://{}", addr), state)
}

async fn spawn_server() -> (String, Arc<AppState>) {
    spawn_with(Arc::new(MemorySpanStore::new())).await
}

async fn post(client: &reqwest::Client, base: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{}/v1/spans/upsert", base))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn wait_for_observers(state: &AppState, n: usize) {
    for _ in 0..100 {
        if state.broadcaster.receiver_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("realtime observer never subscribed");
}

#[tokio::test]
async fn created_then_completed_round_trip() {
    let (base, _state) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = post(
        &client,
        &base,
        json!({"state": "created", "traceId": "t1", "spanId": "s1", "label": "agent.run", "status": "running"}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"success": true, "spanId": "s1"}));

    let resp = post(
        &client,
        &base,
        json!({"state": "completed", "traceId": "t1", "spanId": "s1", "status": "ok", "endTime": "2030-01-01T00:00:00Z"}),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let span: Span = client
        .get(format!("{}/v1/spans/t1/s1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(span.label, "agent.run");
    assert_eq!(span.status, SpanStatus::Ok);
    assert!(span.completed);
    assert_eq!(span.rev, 2);
    assert_eq!(span.end_time.unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");
}

#[tokio::test]
async fn missing_identity_is_rejected_without_side_effects() {
    let (base, state) = spawn_server().await;
    let client = reqwest::Client::new();
    let mut rx = state.broadcaster.subscribe();

    for body in [
        json!({"state": "created", "spanId": "s1"}),
        json!({"state": "created", "traceId": "t1"}),
        json!({"traceId": "t1", "spanId": "s1"}),
        json!({"state": "exploded", "traceId": "t1", "spanId": "s1"}),
    ] {
        let resp = post(&client, &base, body).await;
        assert_eq!(resp.status(), 400);
        let error: Value = resp.json().await.unwrap();
        assert_eq!(error["error"], "bad_request");
        assert!(error["message"].is_string());
    }

    let resp = client
        .post(format!("{}/v1/spans/upsert", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert_eq!(state.store.len().unwrap(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unknown_span_is_not_found() {
    let (base, _state) = spawn_server().await;
    let resp = reqwest::get(format!("{}/v1/spans/nope/nope", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let error: Value = resp.json().await.unwrap();
    assert_eq!(error["error"], "not_found");
}

#[tokio::test]
async fn running_query_returns_only_live_spans() {
    let (base, _state) = spawn_with(Arc::new(SqliteSpanStore::in_memory().unwrap())).await;
    let client = reqwest::Client::new();

    post(&client, &base, json!({"state": "created", "traceId": "t", "spanId": "a", "label": "agent"})).await;
    post(&client, &base, json!({"state": "created", "traceId": "t", "spanId": "b", "label": "tool:x"})).await;
    post(&client, &base, json!({"state": "completed", "traceId": "t", "spanId": "b"})).await;

    let resp: SpansResponse = client
        .get(format!("{}/v1/spans?running=true", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.spans.len(), 1);
    assert_eq!(resp.spans[0].span_id, "a");

    let resp: SpansResponse = client
        .get(format!("{}/v1/spans?status=ok&traceId=t", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.spans.len(), 1);
    assert_eq!(resp.spans[0].span_id, "b");

    let bad = client
        .get(format!("{}/v1/spans?running=maybe", base))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn replayed_key_is_acknowledged_and_not_reapplied() {
    let (base, _state) = spawn_server().await;
    let client = reqwest::Client::new();
    let body = json!({
        "state": "updated",
        "traceId": "t",
        "spanId": "s",
        "events": [{"name": "tick"}],
        "idempotencyKey": "evt-1"
    });

    assert_eq!(post(&client, &base, body.clone()).await.status(), 200);
    assert_eq!(post(&client, &base, body).await.status(), 200);

    let span: Span = reqwest::get(format!("{}/v1/spans/t/s", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(span.rev, 1);
    assert_eq!(span.events.len(), 1);
}

#[tokio::test]
async fn realtime_observer_receives_full_document() {
    let (base, state) = spawn_server().await;
    let client = reqwest::Client::new();

    let ws_url = format!("{}/v1/realtime", base.replacen("http://", "ws://", 1));
    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();
    wait_for_observers(&state, 1).await;

    post(
        &client,
        &base,
        json!({"state": "created", "traceId": "t", "spanId": "s", "label": "agent", "attributes": {"a": 1}}),
    )
    .await;
    post(
        &client,
        &base,
        json!({"state": "updated", "traceId": "t", "spanId": "s", "attributes": {"b": 2}}),
    )
    .await;

    let mut received = Vec::new();
    while received.len() < 2 {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            let raw: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(raw["event"], "span_upsert");
            let message: RealtimeMessage = serde_json::from_value(raw).unwrap();
            received.push(message.into_span());
        }
    }

    assert_eq!(received[0].rev, 1);
    let latest = &received[1];
    assert_eq!(latest.rev, 2);
    assert_eq!(latest.label, "agent");
    assert_eq!(latest.attributes.get("a"), Some(&json!(1)));
    assert_eq!(latest.attributes.get("b"), Some(&json!(2)));
}

#[tokio::test]
async fn shutdown_closes_realtime_sockets() {
    let state = Arc::new(AppState::new(
        Arc::new(MemorySpanStore::new()),
        Broadcaster::new(8),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(spantrack_web::serve(listener, Arc::clone(&state), async {
        let _ = stopped.await;
    }));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/v1/realtime", addr))
        .await
        .unwrap();
    wait_for_observers(&state, 1).await;

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}

#[tokio::test]
async fn health_endpoints() {
    let (base, _state) = spawn_server().await;

    let live: Value = reqwest::get(format!("{}/health/live", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(live["status"], "healthy");

    let ready: Value = reqwest::get(format!("{}/health/ready", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["store"], "memory");
    assert_eq!(ready["spans"], 0);
}
