//! Integration tests for ember-client
//!
//! These tests spin up a real in-memory store server and drive it through
//! the public client, covering the one-shot verbs, the shared error
//! classification, and the change stream end to end.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use ember_client::testing::{wait_for, TestServer};
use ember_client::{EmberClient, EmberClientError, EventKind, SessionState};

// =============================================================================
// In-memory store server
// =============================================================================

/// Shared state: the JSON tree plus a channel of scripted stream frames
#[derive(Clone)]
struct StoreState {
    tree: Arc<Mutex<Value>>,
    frames: broadcast::Sender<String>,
}

fn store() -> (StoreState, Router) {
    let (frames, _) = broadcast::channel(64);
    let state = StoreState {
        tree: Arc::new(Mutex::new(Value::Null)),
        frames,
    };
    let router = Router::new()
        .route("/{*path}", any(handle))
        .with_state(state.clone());
    (state, router)
}

async fn handle(
    State(state): State<StoreState>,
    method: Method,
    Path(raw_path): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(node_path) = raw_path.strip_suffix(".json") else {
        return error_response(StatusCode::BAD_REQUEST, "invalid path");
    };
    let segments: Vec<&str> = node_path.split('/').filter(|s| !s.is_empty()).collect();

    // Scripted failure paths for error-classification tests
    if segments.first() == Some(&"secure") {
        return error_response(StatusCode::FORBIDDEN, "Permission denied");
    }
    if segments.first() == Some(&"boom") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded").into_response();
    }

    match method {
        Method::GET => {
            if wants_event_stream(&headers) {
                return stream_response(&state);
            }
            let tree = state.tree.lock();
            Json(node_at(&tree, &segments).cloned().unwrap_or(Value::Null)).into_response()
        }
        Method::PUT => match parse_body(&body) {
            Ok(value) => {
                *slot_at(&mut state.tree.lock(), &segments) = value.clone();
                Json(value).into_response()
            }
            Err(response) => response,
        },
        Method::PATCH => match parse_body(&body) {
            Ok(Value::Object(updates)) => {
                let mut tree = state.tree.lock();
                let slot = slot_at(&mut tree, &segments);
                if !slot.is_object() {
                    *slot = Value::Object(Default::default());
                }
                let map = slot.as_object_mut().expect("slot was just made an object");
                for (key, value) in updates {
                    map.insert(key, value);
                }
                Json(slot.clone()).into_response()
            }
            Ok(_) => error_response(StatusCode::BAD_REQUEST, "merge body must be an object"),
            Err(response) => response,
        },
        Method::POST => match parse_body(&body) {
            Ok(value) => {
                let id = format!("-{}", uuid::Uuid::new_v4().simple());
                let mut tree = state.tree.lock();
                let slot = slot_at(&mut tree, &segments);
                if !slot.is_object() {
                    *slot = Value::Object(Default::default());
                }
                slot.as_object_mut()
                    .expect("slot was just made an object")
                    .insert(id.clone(), value);
                Json(json!({ "name": id })).into_response()
            }
            Err(response) => response,
        },
        Method::DELETE => {
            remove_at(&mut state.tree.lock(), &segments);
            Json(Value::Null).into_response()
        }
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
    }
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

/// Scripted sentinel: ends the SSE body so tests can simulate the server
/// closing the stream
const CLOSE_FRAME: &str = "__close__";

fn stream_response(state: &StoreState) -> Response {
    let frames = BroadcastStream::new(state.frames.subscribe())
        .filter_map(|frame| async move { frame.ok() })
        .take_while(|frame| {
            let keep = frame != CLOSE_FRAME;
            async move { keep }
        })
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame)));

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(frames),
    )
        .into_response()
}

fn parse_body(body: &str) -> Result<Value, Response> {
    serde_json::from_str(body)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid JSON body"))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn node_at<'a>(tree: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = tree;
    for segment in segments {
        node = node.get(segment)?;
    }
    Some(node)
}

fn node_at_mut<'a>(tree: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
    let mut node = tree;
    for segment in segments {
        node = node.get_mut(segment)?;
    }
    Some(node)
}

/// Walk to `segments`, creating intermediate objects along the way
fn slot_at<'a>(tree: &'a mut Value, segments: &[&str]) -> &'a mut Value {
    let mut node = tree;
    for segment in segments {
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        node = node
            .as_object_mut()
            .expect("node was just made an object")
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    node
}

fn remove_at(tree: &mut Value, segments: &[&str]) {
    match segments.split_last() {
        None => *tree = Value::Null,
        Some((last, parents)) => {
            if let Some(map) = node_at_mut(tree, parents).and_then(Value::as_object_mut) {
                map.remove(*last);
            }
        }
    }
}

// =============================================================================
// Test Helpers
// =============================================================================

async fn start() -> (StoreState, TestServer) {
    let (state, router) = store();
    let server = TestServer::start(router)
        .await
        .expect("failed to start store server");
    (state, server)
}

async fn wait_available(client: &mut EmberClient) -> bool {
    for _ in 0..400 {
        if client.available() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// =============================================================================
// One-shot verb tests
// =============================================================================

#[tokio::test]
async fn test_set_get_roundtrip() {
    let (_state, server) = start().await;
    let client = &server.client;

    client.set("/config/rate", &json!(42)).await.unwrap();
    assert_eq!(client.get("/config/rate").await.unwrap(), json!(42));

    let nested = json!({"thresholds": {"low": 1, "high": 9}, "enabled": true});
    client.set("/config", &nested).await.unwrap();
    assert_eq!(client.get("/config").await.unwrap(), nested);
    assert!(client.success());
}

#[tokio::test]
async fn test_get_missing_path_is_null() {
    let (_state, server) = start().await;

    let value = server.client.get("/nothing/here").await.unwrap();
    assert_eq!(value, Value::Null);
    assert!(server.client.success());
}

#[tokio::test]
async fn test_push_returns_child_id() {
    let (_state, server) = start().await;
    let client = &server.client;

    let id = client.push("/items", &json!({"x": 1})).await.unwrap();
    assert!(!id.is_empty());

    let stored = client.get(&format!("/items/{}", id)).await.unwrap();
    assert_eq!(stored, json!({"x": 1}));

    // A second push lands under a distinct child
    let other = client.push("/items", &json!({"x": 2})).await.unwrap();
    assert_ne!(id, other);
}

#[tokio::test]
async fn test_update_merges_instead_of_replacing() {
    let (_state, server) = start().await;
    let client = &server.client;

    client
        .set("/device", &json!({"name": "probe", "rate": 1}))
        .await
        .unwrap();
    client
        .update("/device", &json!({"rate": 5, "mode": "fast"}))
        .await
        .unwrap();

    assert_eq!(
        client.get("/device").await.unwrap(),
        json!({"name": "probe", "rate": 5, "mode": "fast"})
    );
}

#[tokio::test]
async fn test_remove_deletes_subtree() {
    let (_state, server) = start().await;
    let client = &server.client;

    client.set("/tmp/a", &json!(1)).await.unwrap();
    client.set("/tmp/b", &json!(2)).await.unwrap();
    client.remove("/tmp").await.unwrap();

    assert_eq!(client.get("/tmp").await.unwrap(), Value::Null);
    assert!(client.success());
}

#[tokio::test]
async fn test_get_typed() {
    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct DeviceConfig {
        name: String,
        rate: u32,
    }

    let (_state, server) = start().await;
    let client = &server.client;

    client
        .set("/device", &json!({"name": "probe", "rate": 3}))
        .await
        .unwrap();

    let config: DeviceConfig = client.get_typed("/device").await.unwrap();
    assert_eq!(
        config,
        DeviceConfig {
            name: "probe".to_string(),
            rate: 3
        }
    );
}

// =============================================================================
// Error classification tests
// =============================================================================

#[tokio::test]
async fn test_denied_write_sets_failed_status() {
    let (_state, server) = start().await;
    let client = &server.client;

    match client.set("/secure/key", &json!(1)).await {
        Err(EmberClientError::Remote { status, message }) => {
            assert_eq!(status, 403);
            assert_eq!(message, "Permission denied");
        }
        other => panic!("expected remote error, got {:?}", other),
    }
    assert!(client.failed());
    assert_eq!(client.error(), "Permission denied");

    // A later success clears the flags
    client.set("/open/key", &json!(1)).await.unwrap();
    assert!(client.success());
    assert!(client.error().is_empty());
}

#[tokio::test]
async fn test_plain_text_error_body() {
    let (_state, server) = start().await;

    let result = server.client.get("/boom").await;
    assert!(matches!(
        result,
        Err(EmberClientError::Remote { status: 500, .. })
    ));
    assert_eq!(server.client.error(), "backend exploded");
}

#[tokio::test]
async fn test_denied_push_returns_error() {
    let (_state, server) = start().await;

    let result = server.client.push("/secure/list", &json!(1)).await;
    assert!(result.is_err());
    assert!(server.client.failed());
    assert!(!server.client.error().is_empty());
}

// =============================================================================
// Change stream tests
// =============================================================================

#[tokio::test]
async fn test_stream_put_event() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/foo").await.unwrap();
    state
        .frames
        .send("event: put\ndata: {\"path\":\"/\",\"data\":{\"a\":1}}\n\n".to_string())
        .unwrap();

    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Put);
    assert_eq!(event.path, "/");
    assert_eq!(event.data, json!({"a": 1}));
    assert!(client.success());
    assert_eq!(client.stream_state(), SessionState::Listening);
}

#[tokio::test]
async fn test_stream_patch_event_carries_embedded_path() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/cfg").await.unwrap();
    state
        .frames
        .send("event: patch\ndata: {\"path\":\"/a/b\",\"data\":{\"c\":3}}\n\n".to_string())
        .unwrap();

    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Patch);
    assert_eq!(event.path, "/a/b");
    assert_eq!(event.data, json!({"c": 3}));
}

#[tokio::test]
async fn test_available_is_idempotent() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/foo").await.unwrap();
    assert!(!client.available());
    assert!(!client.available());

    state
        .frames
        .send("event: put\ndata: {\"path\":\"/\",\"data\":1}\n\n".to_string())
        .unwrap();

    assert!(wait_available(client).await);
    assert!(client.available());
    assert!(client.available());

    client.read_event().await.unwrap();
    assert!(!client.available());
    assert!(!client.available());
}

#[tokio::test]
async fn test_stream_keepalive_comment_is_observable() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/foo").await.unwrap();
    state.frames.send(": keep-alive\n\n".to_string()).unwrap();

    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::KeepAlive);
    assert_eq!(event.path, "");
    assert_eq!(event.data, Value::Null);
    assert!(client.success());
}

#[tokio::test]
async fn test_stream_survives_cancel_event() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/foo").await.unwrap();
    state
        .frames
        .send("event: cancel\ndata: \n\n".to_string())
        .unwrap();

    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Cancel);
    assert_eq!(event.data, Value::Null);

    // The session is not auto-closed; the next event still flows.
    state
        .frames
        .send("event: put\ndata: {\"path\":\"/\",\"data\":2}\n\n".to_string())
        .unwrap();
    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Put);
    assert_eq!(event.data, json!(2));
}

#[tokio::test]
async fn test_stream_decode_failure_recovers() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/foo").await.unwrap();
    state
        .frames
        .send("event: put\ndata: {broken\n\n".to_string())
        .unwrap();

    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Unknown);
    assert_eq!(event.data, Value::Null);
    assert!(client.failed());
    assert!(!client.error().is_empty());
    assert_eq!(client.stream_state(), SessionState::Listening);

    // The session keeps listening and the next event decodes cleanly.
    state
        .frames
        .send("event: put\ndata: {\"path\":\"/\",\"data\":true}\n\n".to_string())
        .unwrap();
    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Put);
    assert!(client.success());
}

#[tokio::test]
async fn test_stream_frame_split_across_chunks() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/foo").await.unwrap();
    state
        .frames
        .send("event: put\ndata: {\"path\":\"/x\",".to_string())
        .unwrap();
    state.frames.send("\"data\":1}\n\n".to_string()).unwrap();

    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Put);
    assert_eq!(event.path, "/x");
    assert_eq!(event.data, json!(1));
}

#[tokio::test]
async fn test_stream_rejected_with_remote_error() {
    let (_state, mut server) = start().await;
    let client = &mut server.client;

    let result = client.stream("/secure/feed").await;
    assert!(matches!(
        result,
        Err(EmberClientError::Remote { status: 403, .. })
    ));
    assert!(client.failed());
    assert_eq!(client.error(), "Permission denied");
    assert_eq!(client.stream_state(), SessionState::Closed);
}

#[tokio::test]
async fn test_second_stream_replaces_first() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/a").await.unwrap();
    client.stream("/b").await.unwrap();

    state
        .frames
        .send("event: put\ndata: {\"path\":\"/\",\"data\":\"fresh\"}\n\n".to_string())
        .unwrap();

    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.data, json!("fresh"));
}

#[tokio::test]
async fn test_read_event_without_stream() {
    let (_state, mut server) = start().await;
    let client = &mut server.client;

    assert!(!client.available());
    let result = client.read_event().await;
    assert!(matches!(result, Err(EmberClientError::NoStream)));
    assert!(client.failed());
}

#[tokio::test]
async fn test_one_shot_verbs_do_not_disturb_stream() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/watch").await.unwrap();

    // Verbs run on their own connections while the stream stays open.
    client.set("/watch/x", &json!(1)).await.unwrap();
    assert_eq!(client.get("/watch/x").await.unwrap(), json!(1));

    let tree = state.tree.clone();
    assert!(
        wait_for(
            move || {
                let tree = tree.clone();
                async move { !tree.lock().is_null() }
            },
            Duration::from_secs(1)
        )
        .await
    );

    state
        .frames
        .send("event: put\ndata: {\"path\":\"/x\",\"data\":1}\n\n".to_string())
        .unwrap();
    assert!(wait_available(client).await);
    let event = client.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Put);
    assert_eq!(client.stream_state(), SessionState::Listening);
}

#[tokio::test]
async fn test_open_stream_caller_owned_session() {
    let (state, server) = start().await;

    let mut session = server.client.open_stream("/direct").await.unwrap();
    assert_eq!(session.path(), "/direct");

    state
        .frames
        .send("event: put\ndata: {\"path\":\"/\",\"data\":7}\n\n".to_string())
        .unwrap();

    let event = session.read_event().await.unwrap();
    assert_eq!(event.kind, EventKind::Put);
    assert_eq!(event.data, json!(7));
    assert_eq!(session.state(), SessionState::Listening);

    // Session events record into the owning client's status
    assert!(server.client.success());
}

#[tokio::test]
async fn test_server_close_faults_session() {
    let (state, mut server) = start().await;
    let client = &mut server.client;

    client.stream("/foo").await.unwrap();
    state.frames.send(CLOSE_FRAME.to_string()).unwrap();

    let result = client.read_event().await;
    assert!(result.is_err());
    assert!(client.failed());
    assert_eq!(client.stream_state(), SessionState::Faulted);

    // Recovery is a fresh stream() call.
    client.stream("/foo").await.unwrap();
    state
        .frames
        .send("event: put\ndata: {\"path\":\"/\",\"data\":\"back\"}\n\n".to_string())
        .unwrap();
    assert!(wait_available(client).await);
    assert_eq!(client.read_event().await.unwrap().data, json!("back"));
}
