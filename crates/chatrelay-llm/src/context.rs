//! Bounded conversation context

use chatrelay_store::StoredMessage;

use crate::error::LlmError;
use crate::protocol::ChatMessage;

/// Maximum total content length sent upstream, in bytes of UTF-8 text
///
/// A character count standing in for a token limit; kept as-is for
/// wire compatibility with existing clients.
pub const CONTEXT_CHAR_BUDGET: usize = 4500;

/// What to do with a message that would push the context over budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongMessagePolicy {
    /// Drop the message and keep scanning older history
    Skip,
    /// Fail the whole request
    Reject,
}

impl LongMessagePolicy {
    /// Policy for an application's fix-long-message flag
    pub const fn from_fix_long_message(enabled: bool) -> Self {
        if enabled { Self::Reject } else { Self::Skip }
    }
}

/// Selects the most recent history that fits in the budget
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    budget: usize,
    policy: LongMessagePolicy,
}

impl ContextBuilder {
    /// Builder with the standard budget
    pub const fn new(policy: LongMessagePolicy) -> Self {
        Self {
            budget: CONTEXT_CHAR_BUDGET,
            policy,
        }
    }

    /// Override the budget
    #[must_use]
    pub const fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// Build the upstream message list from `history` (oldest first)
    ///
    /// Walks newest to oldest keeping a running length. Under
    /// [`LongMessagePolicy::Skip`] a message that overflows is left out and
    /// the scan continues, so the result may have gaps. Under
    /// [`LongMessagePolicy::Reject`] the first overflow fails the request.
    /// The kept messages are returned in chronological order.
    pub fn build(&self, history: &[StoredMessage]) -> Result<Vec<ChatMessage>, LlmError> {
        if history.is_empty() {
            return Err(LlmError::EmptyContext);
        }

        let mut total = 0;
        let mut selected = Vec::new();

        for message in history.iter().rev() {
            let candidate = total + message.content.len();

            if candidate > self.budget {
                match self.policy {
                    LongMessagePolicy::Skip => {
                        tracing::debug!(
                            message_id = message.id,
                            length = message.content.len(),
                            "dropping message that exceeds the context budget"
                        );
                        continue;
                    }
                    LongMessagePolicy::Reject => {
                        return Err(LlmError::ContextTooLong {
                            length: candidate,
                            limit: self.budget,
                        });
                    }
                }
            }

            total = candidate;
            selected.push(ChatMessage::new(message.role.as_str(), message.content.clone()));
        }

        if selected.is_empty() {
            return Err(LlmError::EmptyContext);
        }

        selected.reverse();
        Ok(selected)
    }
}
