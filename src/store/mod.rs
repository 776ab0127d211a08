//! Conversation persistence.
//!
//! Conversations and their messages live behind the `ConversationStore`
//! trait so the backing database is swappable; the bundled backend is
//! in-memory. Messages are immutable once appended and ordered by
//! creation time; every append bumps the owning conversation's
//! `updated_at`.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::util::epoch_ms;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Hash of the owning client key; empty/None means unscoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_hash: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Conversation {
    pub fn new(title: Option<String>, api_key_hash: Option<String>) -> Self {
        let now = epoch_ms();
        Self {
            id: Uuid::new_v4(),
            title,
            api_key_hash,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a request presenting `key_hash` may see or mutate this
    /// conversation. Conversations without an owner hash are open.
    pub fn owned_by(&self, key_hash: &str) -> bool {
        match self.api_key_hash.as_deref() {
            None | Some("") => true,
            Some(owner) => owner == key_hash,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    pub created_at: u64,
}

impl StoredMessage {
    pub fn new(conversation_id: Uuid, role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role: role.into(),
            content: content.into(),
            model: None,
            request_id: None,
            finish_reason: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            elapsed_ms: None,
            created_at: epoch_ms(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: Option<String>) -> Self {
        self.finish_reason = finish_reason;
        self
    }

    pub fn with_tokens(
        mut self,
        prompt: Option<u64>,
        completion: Option<u64>,
        total: Option<u64>,
    ) -> Self {
        self.prompt_tokens = prompt;
        self.completion_tokens = completion;
        self.total_tokens = total;
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations for a key hash, most recently updated first.
    async fn list_conversations(
        &self,
        api_key_hash: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>>;

    /// Append a message and bump the conversation's `updated_at`.
    async fn append_message(&self, message: StoredMessage) -> Result<()>;

    /// Messages of a conversation ordered by creation time.
    async fn messages(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>>;

    async fn count_messages(&self, conversation_id: Uuid) -> Result<usize>;

    async fn update_title(&self, id: Uuid, title: String) -> Result<Option<Conversation>>;

    /// Delete a conversation and all its messages. Returns whether it
    /// existed.
    async fn delete_conversation(&self, id: Uuid) -> Result<bool>;
}
