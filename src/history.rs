//! Best-effort conversation recording around the chat pipeline.
//!
//! Persistence is a side channel: every failure here is logged and
//! swallowed, and the client response is never affected.

use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::ChatMessage;
use crate::store::{Conversation, ConversationStore, StoredMessage};

const TITLE_MAX_CHARS: usize = 100;

/// Metadata attached to a recorded assistant message.
#[derive(Debug, Default, Clone)]
pub struct OutgoingMeta {
    pub model: Option<String>,
    pub request_id: Option<String>,
    pub finish_reason: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub elapsed_ms: Option<u64>,
}

#[derive(Clone)]
pub struct ChatHistory {
    store: Arc<dyn ConversationStore>,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Independent handle to the underlying store, for detached tasks
    /// that outlive the request scope.
    pub fn store(&self) -> Arc<dyn ConversationStore> {
        self.store.clone()
    }

    /// Resolve or lazily create the conversation for a request and append
    /// all incoming messages. Returns the conversation id, or None when
    /// persistence failed.
    pub async fn record_incoming(
        &self,
        conversation_ref: Option<&str>,
        messages: &[ChatMessage],
        model: &str,
        request_id: &str,
        api_key_hash: &str,
    ) -> Option<Uuid> {
        let conversation = self
            .resolve_conversation(conversation_ref, messages, api_key_hash)
            .await?;
        let conversation_id = conversation.id;

        for msg in messages {
            let stored = StoredMessage::new(conversation_id, msg.role.clone(), msg.content.clone())
                .with_model(model)
                .with_request_id(request_id);
            if let Err(e) = self.store.append_message(stored).await {
                error!(request_id = %request_id, error = %e, "Error saving message");
                return Some(conversation_id);
            }
        }

        Some(conversation_id)
    }

    /// Append the assistant message produced for a conversation.
    pub async fn record_outgoing(&self, conversation_id: Uuid, content: String, meta: OutgoingMeta) {
        let mut stored = StoredMessage::new(conversation_id, "assistant", content)
            .with_finish_reason(meta.finish_reason)
            .with_tokens(meta.prompt_tokens, meta.completion_tokens, meta.total_tokens);
        if let Some(model) = meta.model {
            stored = stored.with_model(model);
        }
        if let Some(request_id) = &meta.request_id {
            stored = stored.with_request_id(request_id.clone());
        }
        if let Some(elapsed_ms) = meta.elapsed_ms {
            stored = stored.with_elapsed_ms(elapsed_ms);
        }

        if let Err(e) = self.store.append_message(stored).await {
            error!(
                conversation_id = %conversation_id,
                request_id = meta.request_id.as_deref().unwrap_or(""),
                error = %e,
                "Error saving assistant message"
            );
        }
    }

    async fn resolve_conversation(
        &self,
        conversation_ref: Option<&str>,
        messages: &[ChatMessage],
        api_key_hash: &str,
    ) -> Option<Conversation> {
        if let Some(reference) = conversation_ref {
            // Malformed references fall through to a fresh conversation.
            if let Ok(id) = Uuid::parse_str(reference) {
                match self.store.get_conversation(id).await {
                    Ok(Some(existing)) if existing.owned_by(api_key_hash) => {
                        return Some(existing);
                    }
                    Ok(Some(_)) => {
                        warn!(
                            conversation_id = %id,
                            "Conversation owned by another key, starting a new one"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "Error resolving conversation");
                        return None;
                    }
                }
            }
        }

        let title = derive_title(messages);
        match self
            .store
            .create_conversation(Conversation::new(
                title,
                Some(api_key_hash.to_string()),
            ))
            .await
        {
            Ok(conversation) => Some(conversation),
            Err(e) => {
                error!(error = %e, "Error creating conversation");
                None
            }
        }
    }
}

/// Title for a new conversation: the first user message, truncated to
/// 100 characters with an ellipsis marker when longer.
pub fn derive_title(messages: &[ChatMessage]) -> Option<String> {
    let first_user = messages.iter().find(|m| m.role == "user")?;
    let content = &first_user.content;
    if content.chars().count() > TITLE_MAX_CHARS {
        let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
        Some(format!("{}...", truncated))
    } else {
        Some(content.clone())
    }
}
