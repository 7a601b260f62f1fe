//! Throwaway chat servers for tests.

use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Bind `router` on an ephemeral local port and return its base address.
pub(crate) async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Answers every method at once with canned results, plus a few broken routes.
pub(crate) fn rpc_router() -> Router {
    Router::new()
        .route("/", post(canned_rpc))
        .route(
            "/broken",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/garbage", post(|| async { "not json" }))
        .route("/empty", post(|| async { Json(json!({})) }))
}

async fn canned_rpc(Json(body): Json<Value>) -> Json<Value> {
    let reply = match body["method"].as_str() {
        Some("receive_message") => json!({ "result": { "message": "hi", "sender": "stub" } }),
        Some("post_message") => match body["parameters"]["message"].as_str() {
            Some(_) => json!({ "result": "message sent!" }),
            None => json!({ "error": { "code": 1003, "value": "Missing parameters: message" } }),
        },
        Some(_) => json!({ "error": { "code": 1001, "value": "Invalid method" } }),
        None => json!({ "error": { "code": 1002, "value": "Missing method." } }),
    };
    Json(reply)
}

/// Long-polling chat server: `receive_message` is held open until someone
/// calls `post_message`.
pub(crate) fn chat_router(events: broadcast::Sender<String>) -> Router {
    Router::new().route("/", post(chat_rpc)).with_state(events)
}

async fn chat_rpc(
    State(events): State<broadcast::Sender<String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let reply = match body["method"].as_str() {
        Some("receive_message") => {
            let mut rx = events.subscribe();
            match rx.recv().await {
                Ok(message) => json!({ "result": { "message": message } }),
                Err(e) => json!({ "error": { "code": 1000, "value": e.to_string() } }),
            }
        }
        Some("post_message") => match body["parameters"]["message"].as_str() {
            Some(message) => {
                let _ = events.send(message.to_string());
                json!({ "result": "message sent!" })
            }
            None => json!({ "error": { "code": 1003, "value": "Missing parameters: message" } }),
        },
        Some(_) => json!({ "error": { "code": 1001, "value": "Invalid method" } }),
        None => json!({ "error": { "code": 1002, "value": "Missing method." } }),
    };
    Json(reply)
}
