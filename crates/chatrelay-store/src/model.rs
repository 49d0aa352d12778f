use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// End-user turn
    User,
    /// Model reply
    Assistant,
}

impl Role {
    /// Parse a wire role name, ignoring unknown values
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Wire name of the role
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant allowed to call the open API
#[derive(Debug, Clone, Serialize)]
pub struct Application {
    pub id: u64,
    pub name: String,
    #[serde(skip)]
    pub app_key: SecretString,
    #[serde(skip)]
    pub api_key: Option<SecretString>,
    #[serde(skip)]
    pub enabled: bool,
    /// Reject over-long history instead of dropping messages from it
    #[serde(skip)]
    pub fix_long_message: bool,
}

impl Application {
    /// Whether `key` is this application's app key or api key
    pub fn matches_key(&self, key: &str) -> bool {
        self.app_key.expose_secret() == key
            || self.api_key.as_ref().is_some_and(|k| k.expose_secret() == key)
    }
}

/// A persisted message; immutable once stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: u64,
    #[serde(rename = "chat_id")]
    pub conversation_id: u64,
    pub role: Role,
    pub content: String,
    /// Upstream payload the message was assembled from
    #[serde(skip)]
    pub raw: String,
    pub created_at: u64,
}

/// A message about to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub raw: String,
}

impl NewMessage {
    /// A user turn with no upstream payload
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            raw: String::new(),
        }
    }
}

/// A conversation and its message history, oldest first
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: u64,
    #[serde(skip)]
    pub application_id: u64,
    pub model: String,
    pub remark: String,
    pub messages: Vec<StoredMessage>,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
