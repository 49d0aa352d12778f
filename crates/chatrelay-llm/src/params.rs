//! Request parameters accepted by the open API completion routes

use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::request::SamplingParams;

/// Validated parameters of a query or chat request
///
/// Accepted keys are `content`, `chat_id`, `remark`, `model`,
/// `temperature`, `max_tokens`, `top_p`, `frequency_penalty` and
/// `presence_penalty`. Anything else (such as a `token` credential) is
/// ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatParams {
    /// The user's message; never empty
    pub content: String,
    /// Existing conversation to continue; `None` starts a new one
    pub chat_id: Option<u64>,
    /// New remark for the conversation
    pub remark: Option<String>,
    /// Model for a new conversation
    pub model: Option<String>,
    pub sampling: SamplingParams,
}

impl ChatParams {
    /// Parse a JSON or form-encoded body
    ///
    /// The content type decides the format; without one a body starting
    /// with `{` is read as JSON and anything else as a form.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self, LlmError> {
        let fields = if is_json(content_type, body) {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(fields)) => fields,
                Ok(_) => return Err(LlmError::InvalidRequest("request body must be a JSON object".to_owned())),
                Err(e) => return Err(LlmError::InvalidRequest(format!("malformed JSON body: {e}"))),
            }
        } else {
            url::form_urlencoded::parse(body)
                .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
                .collect()
        };

        Self::from_fields(&fields)
    }

    fn from_fields(fields: &Map<String, Value>) -> Result<Self, LlmError> {
        let content = text(fields, "content")?
            .ok_or_else(|| LlmError::InvalidRequest("content is required".to_owned()))?;

        let sampling = SamplingParams {
            temperature: number(fields, "temperature")?,
            max_tokens: number(fields, "max_tokens")?,
            frequency_penalty: number(fields, "frequency_penalty")?,
            presence_penalty: number(fields, "presence_penalty")?,
            top_p: number(fields, "top_p")?,
        };
        sampling.validate()?;

        Ok(Self {
            content,
            chat_id: chat_id(fields.get("chat_id")),
            remark: text(fields, "remark")?,
            model: text(fields, "model")?,
            sampling,
        })
    }
}

fn is_json(content_type: Option<&str>, body: &[u8]) -> bool {
    match content_type {
        Some(ct) if ct.starts_with("application/json") => true,
        Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => false,
        _ => body.trim_ascii_start().starts_with(b"{"),
    }
}

/// Optional non-empty string field
fn text(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, LlmError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(LlmError::InvalidRequest(format!("{key} must be a string"))),
    }
}

/// Optional numeric field, accepting numbers or numeric strings
fn number<T>(fields: &Map<String, Value>, key: &str) -> Result<Option<T>, LlmError>
where
    T: serde::de::DeserializeOwned + std::str::FromStr,
{
    let invalid = || LlmError::InvalidRequest(format!("{key} must be a number"));

    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(value @ Value::Number(_)) => serde_json::from_value(value.clone()).map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// Positive conversation id; anything unparsable or zero means "new"
fn chat_id(value: Option<&Value>) -> Option<u64> {
    let id = match value? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };

    (id != 0).then_some(id)
}
