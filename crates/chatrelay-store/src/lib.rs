//! Conversation persistence seam
//!
//! The completion pipeline only reads a conversation snapshot and appends
//! messages; everything it needs from durable storage goes through
//! [`ConversationStore`]. [`MemoryStore`] backs the binary and the tests.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod error;
mod memory;
mod model;

use async_trait::async_trait;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use model::{Application, Conversation, NewMessage, Role, StoredMessage};

/// Durable storage for applications, conversations, and their messages
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Find an application by its app key or api key
    async fn application_by_key(&self, key: &str) -> Result<Option<Application>, StoreError>;

    /// Create an empty conversation owned by `application_id`
    async fn create_conversation(&self, application_id: u64, model: &str) -> Result<Conversation, StoreError>;

    /// Load a conversation with all of its messages in insertion order
    async fn load_conversation(&self, id: u64) -> Result<Conversation, StoreError>;

    /// Replace the free-form remark attached to a conversation
    async fn update_remark(&self, id: u64, remark: &str) -> Result<(), StoreError>;

    /// Append a message to the end of a conversation
    async fn append_message(&self, conversation_id: u64, message: NewMessage) -> Result<StoredMessage, StoreError>;
}
