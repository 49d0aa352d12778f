//! Mock completion upstream for integration tests
//!
//! Serves `/v1/chat/completions` with a canned JSON body for blocking
//! requests and canned lines for streaming ones, and records every request
//! body it receives.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use tokio_util::sync::CancellationToken;

/// Mock upstream that returns predictable responses
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    requests: Mutex<Vec<serde_json::Value>>,
    stream_body: String,
    json_body: serde_json::Value,
    fail_with: Option<StatusCode>,
}

/// One streamed frame carrying a content delta
pub fn content_frame(role: Option<&str>, content: &str) -> String {
    let mut delta = serde_json::json!({ "content": content });
    if let Some(role) = role {
        delta["role"] = role.into();
    }

    let chunk = serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000u64,
        "model": "gpt-3.5-turbo",
        "choices": [{ "index": 0, "delta": delta, "finish_reason": null }],
    });

    format!("data: {chunk}\n\n")
}

/// A blocking response whose first choice says `content`
pub fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1_700_000_000u64,
        "model": "gpt-3.5-turbo",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": { "prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7 },
    })
}

impl MockUpstream {
    /// Streams `"Hi"`, `" there"` then `[DONE]`; answers blocking requests with "Hello"
    pub async fn start() -> anyhow::Result<Self> {
        let body = [
            content_frame(Some("assistant"), "Hi"),
            content_frame(None, " there"),
            "data: [DONE]\n\n".to_owned(),
        ]
        .concat();

        Self::start_inner(body, completion("Hello"), None).await
    }

    /// Stream exactly `body` to streaming requests
    pub async fn start_streaming(body: &str) -> anyhow::Result<Self> {
        Self::start_inner(body.to_owned(), completion("Hello"), None).await
    }

    /// Answer blocking requests with `body`
    pub async fn start_responding(body: serde_json::Value) -> anyhow::Result<Self> {
        Self::start_inner(String::new(), body, None).await
    }

    /// Fail every request with `status`
    pub async fn start_failing(status: StatusCode) -> anyhow::Result<Self> {
        Self::start_inner(String::new(), serde_json::Value::Null, Some(status)).await
    }

    async fn start_inner(
        stream_body: String,
        json_body: serde_json::Value,
        fail_with: Option<StatusCode>,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            requests: Mutex::new(Vec::new()),
            stream_body,
            json_body,
            fail_with,
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for the upstream configuration
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request bodies received so far
    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_chat_completions(
    State(state): State<Arc<MockState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let stream = body["stream"].as_bool().unwrap_or(false);
    state.requests.lock().unwrap().push(body);

    if let Some(status) = state.fail_with {
        let error = serde_json::json!({
            "error": { "message": "mock upstream intentional failure", "type": "server_error" }
        });
        return (status, Json(error)).into_response();
    }

    if stream {
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            state.stream_body.clone(),
        )
            .into_response();
    }

    Json(state.json_body.clone()).into_response()
}
