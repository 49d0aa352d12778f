//! Axum route handlers for the open API

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, Router, routing};
use chatrelay_config::Config;
use chatrelay_core::{Envelope, ErrorEnvelope, HttpError};
use chatrelay_store::{Application, Conversation, ConversationStore, NewMessage, StoreError, StoredMessage};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::context::LongMessagePolicy;
use crate::error::LlmError;
use crate::params::ChatParams;
use crate::relay::{relay, relay_raw};
use crate::session::CompletionSession;

const EVENT_STREAM: &str = "text/event-stream;charset=utf-8";

/// Shared state for the open API handlers
#[derive(Clone)]
pub struct LlmState {
    inner: Arc<LlmStateInner>,
}

struct LlmStateInner {
    session: CompletionSession,
    store: Arc<dyn ConversationStore>,
}

impl LlmState {
    pub fn new(session: CompletionSession, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            inner: Arc::new(LlmStateInner { session, store }),
        }
    }

    /// Build the state from configuration, failing closed on a bad upstream
    pub fn from_config(config: &Config, store: Arc<dyn ConversationStore>) -> Result<Self, LlmError> {
        let session = CompletionSession::new(&config.upstream, config.site_name.clone(), store.clone())?;
        Ok(Self::new(session, store))
    }

    pub fn session(&self) -> &CompletionSession {
        &self.inner.session
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.inner.store
    }

    /// Resolve the conversation a request continues or starts, record the
    /// user's message and return a fresh snapshot of its history
    async fn open_conversation(&self, app: &Application, params: &ChatParams) -> Result<Conversation, LlmError> {
        let store = self.store();

        let conversation = match params.chat_id {
            Some(id) => match store.load_conversation(id).await {
                Ok(conversation) if conversation.application_id == app.id => conversation,
                Ok(_) | Err(StoreError::ConversationNotFound { .. }) => {
                    return Err(LlmError::InvalidRequest("chat_id is invalid".to_owned()));
                }
                Err(e) => return Err(e.into()),
            },
            None => {
                let model = params.model.as_deref().unwrap_or(self.session().default_model());
                store.create_conversation(app.id, model).await?
            }
        };

        if let Some(remark) = &params.remark {
            store.update_remark(conversation.id, remark).await?;
        }

        store
            .append_message(conversation.id, NewMessage::user(params.content.clone()))
            .await?;

        tracing::debug!(
            application = %app.name,
            conversation_id = conversation.id,
            model = %conversation.model,
            "recorded user message"
        );

        Ok(store.load_conversation(conversation.id).await?)
    }
}

/// Build the open API router
///
/// Handlers expect the authenticated [`Application`] as a request
/// extension.
pub fn open_router(state: LlmState) -> Router {
    Router::new()
        .route("/api/open", routing::post(application_info))
        .route("/api/open/", routing::post(application_info))
        .route("/api/open/query", routing::post(query))
        .route("/api/open/chat", routing::post(chat))
        .route("/api/open/chat/raw", routing::post(chat_raw))
        .with_state(state)
}

/// Handle `POST /api/open/`
async fn application_info(Extension(app): Extension<Application>) -> Response {
    Json(Envelope::ok(app)).into_response()
}

/// Handle `POST /api/open/query`
async fn query(
    State(state): State<LlmState>,
    Extension(app): Extension<Application>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match run_query(&state, &app, &headers, &body).await {
        Ok(message) => Json(Envelope::ok(message)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn run_query(state: &LlmState, app: &Application, headers: &HeaderMap, body: &[u8]) -> Result<StoredMessage, LlmError> {
    let params = ChatParams::parse(content_type(headers), body)?;
    let conversation = state.open_conversation(app, &params).await?;
    let policy = LongMessagePolicy::from_fix_long_message(app.fix_long_message);

    state.session().complete(&conversation, policy, params.sampling).await
}

/// Handle `POST /api/open/chat`
async fn chat(
    State(state): State<LlmState>,
    Extension(app): Extension<Application>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = match ChatParams::parse(content_type(&headers), &body) {
        Ok(params) => params,
        Err(e) => return error_response(&e),
    };

    let conversation = match state.open_conversation(&app, &params).await {
        Ok(conversation) => conversation,
        Err(e) => return error_response(&e),
    };

    let policy = LongMessagePolicy::from_fix_long_message(app.fix_long_message);

    match state.session().stream(&conversation, policy, params.sampling) {
        Ok(reply) => event_stream(Body::from_stream(relay(reply))),
        Err(e) => error_response(&e),
    }
}

/// Handle `POST /api/open/chat/raw`
///
/// The body is forwarded upstream unchanged apart from a removed `token`
/// key, and the upstream's lines are relayed without an envelope.
async fn chat_raw(State(state): State<LlmState>, Extension(app): Extension<Application>, body: Bytes) -> Response {
    let mut fields = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(fields)) => fields,
        _ => {
            return error_response(&LlmError::InvalidRequest(
                "request body must be a JSON object".to_owned(),
            ));
        }
    };

    fields.remove("token");

    let forwarded = match serde_json::to_vec(&fields) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => return error_response(&LlmError::Internal(e.into())),
    };

    tracing::debug!(application = %app.name, "forwarding raw completion request");

    let reply = state.session().pass_through(forwarded);
    let mut response = event_stream(Body::from_stream(relay_raw(reply)));
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

/// Streaming response with proxy buffering disabled
fn event_stream(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no"));

    response
}

/// Convert a pipeline error into an error envelope response
fn error_response(error: &LlmError) -> Response {
    let status = error.status_code();

    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    } else {
        tracing::debug!(error = %error, "request rejected");
    }

    (status, Json(ErrorEnvelope::from_error(error))).into_response()
}
