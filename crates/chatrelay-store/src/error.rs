use thiserror::Error;

/// Errors surfaced by a [`ConversationStore`](crate::ConversationStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// No conversation exists with this id
    #[error("conversation not found: {id}")]
    ConversationNotFound { id: u64 },

    /// The backing store failed
    #[error("store backend error: {0}")]
    Backend(String),
}
