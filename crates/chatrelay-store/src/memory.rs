use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chatrelay_config::ApplicationConfig;
use dashmap::DashMap;
use secrecy::SecretString;

use crate::model::unix_now;
use crate::{Application, Conversation, ConversationStore, NewMessage, StoreError, StoredMessage};

/// In-process store backed by concurrent maps
///
/// Conversations are kept whole; appends take the per-entry write lock,
/// which gives the same per-row write semantics a database would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    applications: DashMap<u64, Application>,
    conversations: DashMap<u64, Conversation>,
    next_application_id: AtomicU64,
    next_conversation_id: AtomicU64,
    next_message_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the configured applications
    pub fn from_applications(configs: &[ApplicationConfig]) -> Self {
        let store = Self::new();
        for config in configs {
            let app = store.add_application(&config.name, config.app_key.clone());
            if let Some(mut entry) = store.applications.get_mut(&app.id) {
                entry.api_key.clone_from(&config.api_key);
                entry.enabled = config.enabled;
                entry.fix_long_message = config.fix_long_message;
            }
            tracing::debug!(application = %config.name, enabled = config.enabled, "registered application");
        }
        store
    }

    /// Register an enabled application and return it
    pub fn add_application(&self, name: &str, app_key: SecretString) -> Application {
        let id = self.next_application_id.fetch_add(1, Ordering::Relaxed) + 1;
        let app = Application {
            id,
            name: name.to_owned(),
            app_key,
            api_key: None,
            enabled: true,
            fix_long_message: false,
        };
        self.applications.insert(id, app.clone());
        app
    }

    /// Number of messages stored for a conversation
    pub fn message_count(&self, conversation_id: u64) -> usize {
        self.conversations
            .get(&conversation_id)
            .map_or(0, |c| c.messages.len())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn application_by_key(&self, key: &str) -> Result<Option<Application>, StoreError> {
        if key.is_empty() {
            return Ok(None);
        }

        Ok(self
            .applications
            .iter()
            .find(|entry| entry.matches_key(key))
            .map(|entry| entry.value().clone()))
    }

    async fn create_conversation(&self, application_id: u64, model: &str) -> Result<Conversation, StoreError> {
        let id = self.next_conversation_id.fetch_add(1, Ordering::Relaxed) + 1;
        let conversation = Conversation {
            id,
            application_id,
            model: model.to_owned(),
            remark: String::new(),
            messages: Vec::new(),
        };
        self.conversations.insert(id, conversation.clone());
        Ok(conversation)
    }

    async fn load_conversation(&self, id: u64) -> Result<Conversation, StoreError> {
        self.conversations
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(StoreError::ConversationNotFound { id })
    }

    async fn update_remark(&self, id: u64, remark: &str) -> Result<(), StoreError> {
        let mut conversation = self
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::ConversationNotFound { id })?;
        remark.clone_into(&mut conversation.remark);
        Ok(())
    }

    async fn append_message(&self, conversation_id: u64, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let mut conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::ConversationNotFound { id: conversation_id })?;

        let stored = StoredMessage {
            id: self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1,
            conversation_id,
            role: message.role,
            content: message.content,
            raw: message.raw,
            created_at: unix_now(),
        };
        conversation.messages.push(stored.clone());
        Ok(stored)
    }
}
