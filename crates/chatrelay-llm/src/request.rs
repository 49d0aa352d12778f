//! Upstream completion requests and their sampling parameters

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::protocol::{ChatMessage, ChatRequest};

/// Parameters controlling text generation
///
/// Every field is optional and omitted from the upstream body when unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature (0.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Frequency penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Presence penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Nucleus sampling threshold (0.0 to 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl SamplingParams {
    /// Check every set parameter against the range the upstream accepts
    pub fn validate(&self) -> Result<(), LlmError> {
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;

        if self.max_tokens == Some(0) {
            return Err(LlmError::InvalidRequest("max_tokens must be greater than 0".to_owned()));
        }

        Ok(())
    }
}

fn check_range(name: &str, value: Option<f64>, min: f64, max: f64) -> Result<(), LlmError> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(LlmError::InvalidRequest(format!(
            "{name} must be between {min} and {max}"
        ))),
        _ => Ok(()),
    }
}

/// One upstream invocation, immutable once built
///
/// When `raw_body` is present the structured fields are ignored: the bytes
/// are forwarded verbatim and the response is relayed line by line without
/// decoding.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub user: String,
    pub stream: bool,
    pub params: SamplingParams,
    pub raw_body: Option<Bytes>,
}

impl CompletionRequest {
    /// Forward `body` verbatim upstream in pass-through mode
    pub fn pass_through(body: Bytes) -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            user: String::new(),
            stream: true,
            params: SamplingParams::default(),
            raw_body: Some(body),
        }
    }

    /// Whether the request runs in pass-through mode
    pub const fn is_pass_through(&self) -> bool {
        self.raw_body.is_some()
    }

    /// Structured upstream body for this request
    pub fn to_wire(&self) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: self.messages.clone(),
            user: self.user.clone(),
            stream: self.stream,
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
            frequency_penalty: self.params.frequency_penalty,
            presence_penalty: self.params.presence_penalty,
            top_p: self.params.top_p,
        }
    }
}
