//! In-memory conversation storage.
//!
//! Development and single-instance deployments; data is lost when the
//! process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{Conversation, ConversationStore, StoredMessage};
use crate::error::{GatewayError, Result};
use crate::util::epoch_ms;

#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    messages: RwLock<Vec<StoredMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_err<T>(_: T) -> GatewayError {
    GatewayError::Persistence("store lock poisoned".to_string())
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        let mut conversations = self.conversations.write().map_err(lock_err)?;
        conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversations = self.conversations.read().map_err(lock_err)?;
        Ok(conversations.get(&id).cloned())
    }

    async fn list_conversations(
        &self,
        api_key_hash: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        let conversations = self.conversations.read().map_err(lock_err)?;
        let mut results: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.api_key_hash.as_deref() == Some(api_key_hash))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(results.into_iter().skip(skip).take(limit).collect())
    }

    async fn append_message(&self, message: StoredMessage) -> Result<()> {
        let conversation_id = message.conversation_id;
        {
            let mut messages = self.messages.write().map_err(lock_err)?;
            messages.push(message);
        }

        let mut conversations = self.conversations.write().map_err(lock_err)?;
        if let Some(conversation) = conversations.get_mut(&conversation_id) {
            // Guard against clock steps; updated_at never goes backwards.
            conversation.updated_at = conversation.updated_at.max(epoch_ms());
        }
        Ok(())
    }

    async fn messages(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>> {
        let messages = self.messages.read().map_err(lock_err)?;
        let mut results: Vec<StoredMessage> = messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        results.sort_by_key(|m| m.created_at);
        Ok(results)
    }

    async fn count_messages(&self, conversation_id: Uuid) -> Result<usize> {
        let messages = self.messages.read().map_err(lock_err)?;
        Ok(messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count())
    }

    async fn update_title(&self, id: Uuid, title: String) -> Result<Option<Conversation>> {
        let mut conversations = self.conversations.write().map_err(lock_err)?;
        Ok(conversations.get_mut(&id).map(|conversation| {
            conversation.title = Some(title);
            conversation.updated_at = conversation.updated_at.max(epoch_ms());
            conversation.clone()
        }))
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<bool> {
        let existed = {
            let mut conversations = self.conversations.write().map_err(lock_err)?;
            conversations.remove(&id).is_some()
        };
        if existed {
            let mut messages = self.messages.write().map_err(lock_err)?;
            messages.retain(|m| m.conversation_id != id);
        }
        Ok(existed)
    }
}
