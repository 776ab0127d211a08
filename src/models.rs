//! Wire-level data shapes: the canonical gateway dialect and the
//! OpenAI-compatible dialect it translates 1:1 into.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{GatewayError, Result};

/// A single chat message in a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Canonical chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// Optional UUID string of an existing conversation to append to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// Token usage as reported by the upstream provider.
pub type Usage = HashMap<String, Option<u64>>;

/// One incremental piece of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponseChunk {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub delta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Present only on the final chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A fully buffered completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponseFull {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Canonical non-streamed response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

// OpenAI-compatible subset.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

impl OaChatCompletionRequest {
    /// Translate into the canonical shape, qualifying the model id with
    /// the `openai:` prefix when it is missing one.
    pub fn into_canonical(self) -> ChatRequest {
        let model = if self.model.starts_with("openai:") {
            self.model
        } else {
            format!("openai:{}", self.model)
        };
        ChatRequest {
            model,
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: self.stream,
            conversation_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<OaChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

const VALID_ROLES: [&str; 3] = ["system", "user", "assistant"];

/// Validate an inbound request before it reaches the pipeline.
pub fn validate_chat_request(req: &ChatRequest) -> Result<()> {
    if req.model.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "model id must not be empty".into(),
        ));
    }

    if req.messages.is_empty() {
        return Err(GatewayError::InvalidRequest("no messages provided".into()));
    }

    for msg in &req.messages {
        if !VALID_ROLES.contains(&msg.role.as_str()) {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid role: {}",
                msg.role
            )));
        }
    }

    if !(0.0..=2.0).contains(&req.temperature) {
        return Err(GatewayError::InvalidRequest(format!(
            "temperature out of range: {}",
            req.temperature
        )));
    }

    if let Some(max_tokens) = req.max_tokens
        && max_tokens == 0
    {
        return Err(GatewayError::InvalidRequest(
            "max_tokens must be greater than 0".into(),
        ));
    }

    Ok(())
}
