use std::sync::Arc;

use axum::Json;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chatrelay_core::{ErrorEnvelope, HttpError};
use chatrelay_llm::LlmError;
use chatrelay_store::ConversationStore;
use http::header::AUTHORIZATION;

/// Authenticate open API requests by application key
///
/// The key comes from the `Authorization` header (with or without a
/// `Bearer ` prefix) or, failing that, the `token` query parameter. The
/// resolved application is stored as a request extension.
pub async fn auth_middleware(store: Arc<dyn ConversationStore>, mut request: Request, next: Next) -> Response {
    let Some(key) = credential(&request) else {
        return reject(&LlmError::Unauthorized);
    };

    match store.application_by_key(&key).await {
        Ok(Some(app)) if app.enabled => {
            tracing::debug!(application = %app.name, "application authenticated");
            request.extensions_mut().insert(app);
            next.run(request).await
        }
        Ok(Some(app)) => {
            tracing::warn!(application = %app.name, "rejected disabled application");
            reject(&LlmError::Unauthorized)
        }
        Ok(None) => {
            tracing::warn!("application authentication failed");
            reject(&LlmError::Unauthorized)
        }
        Err(e) => {
            tracing::error!(error = %e, "application lookup failed");
            reject(&LlmError::Store(e))
        }
    }
}

fn credential(request: &Request) -> Option<String> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
        .filter(|v| !v.is_empty());

    if let Some(key) = header {
        return Some(key.to_owned());
    }

    let query = request.uri().query()?;

    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|v| !v.is_empty())
}

fn reject(error: &LlmError) -> Response {
    (error.status_code(), Json(ErrorEnvelope::from_error(error))).into_response()
}
