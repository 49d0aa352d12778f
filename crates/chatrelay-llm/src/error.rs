//! Error type shared by every stage of the completion pipeline

use chatrelay_core::HttpError;
use chatrelay_store::StoreError;
use http::StatusCode;
use thiserror::Error;

/// Errors produced by the completion pipeline
#[derive(Debug, Error)]
pub enum LlmError {
    /// Upstream credential, address, or model is missing or unusable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Conversation history exceeds the context budget and may not be truncated
    #[error("conversation context of {length} characters exceeds the {limit} character limit")]
    ContextTooLong { length: usize, limit: usize },

    /// There is no history to send upstream
    #[error("conversation has no messages to send")]
    EmptyContext,

    /// Connecting to or reading from the upstream failed
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// Upstream finished without producing a single choice
    #[error("upstream returned no completion choices")]
    EmptyCompletion,

    /// Client sent a malformed or invalid request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request lacks a valid application credential
    #[error("application authentication failed")]
    Unauthorized,

    /// The downstream client went away while the reply was streaming
    #[error("client disconnected")]
    ClientDisconnected,

    /// Conversation storage failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HttpError for LlmError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ContextTooLong { .. } | Self::EmptyContext | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Transport(_) | Self::EmptyCompletion => StatusCode::BAD_GATEWAY,
            Self::Store(StoreError::ConversationNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Configuration(_)
            | Self::ClientDisconnected
            | Self::Store(StoreError::Backend(_))
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::ContextTooLong { .. } => "context_too_long",
            Self::EmptyContext => "empty_context",
            Self::Transport(_) => "upstream_error",
            Self::EmptyCompletion => "empty_completion",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Unauthorized => "authentication_error",
            Self::ClientDisconnected => "client_disconnected",
            Self::Store(StoreError::ConversationNotFound { .. }) => "not_found_error",
            Self::Store(StoreError::Backend(_)) => "store_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Configuration(_) => "upstream is not configured".to_owned(),
            Self::Store(StoreError::Backend(_)) | Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }
}
