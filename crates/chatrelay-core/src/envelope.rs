use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::HttpError;

/// Success envelope wrapping every JSON payload the proxy emits
///
/// Serialized as `{"status":"ok","code":200,"data":...}` both for plain
/// JSON responses and for each streamed `data:` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Always `"ok"` for successful payloads
    pub status: String,
    /// Numeric status code mirrored in the body
    pub code: u16,
    /// The wrapped payload
    pub data: T,
}

impl<T> Envelope<T> {
    /// Wrap a payload in a success envelope
    pub fn ok(data: T) -> Self {
        Self {
            status: "ok".to_owned(),
            code: StatusCode::OK.as_u16(),
            data,
        }
    }
}

/// Failure envelope carrying a client-safe error description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always `"error"`
    pub status: String,
    /// HTTP status code associated with the failure
    pub code: u16,
    /// Machine-readable error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorEnvelope {
    /// Build an envelope from any domain error
    pub fn from_error<E: HttpError + ?Sized>(error: &E) -> Self {
        Self {
            status: "error".to_owned(),
            code: error.status_code().as_u16(),
            error_type: error.error_type().to_owned(),
            message: error.client_message(),
        }
    }
}
