//! The request pipeline: admission, idempotency, provider dispatch,
//! streaming, persistence, and billing composed into one object.
//!
//! The gateway owns every piece of shared state (limiter registry,
//! breaker registry, idempotency cache, store handle) and is passed via
//! handler state; nothing here is global.

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::billing::{UsageEvent, UsageReporter};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::history::{ChatHistory, OutgoingMeta};
use crate::idempotency::IdempotencyStore;
use crate::models::{ChatRequest, MessagesResponse, validate_chat_request};
use crate::provider::{Provider, ProviderRegistry};
use crate::resilience::{BreakerRegistry, ResilientClient, RetryPolicy};
use crate::store::{Conversation, ConversationStore, StoredMessage};
use crate::stream::{CompletionHook, StreamTranscoder, WireFormat};
use crate::util::api_key_hash;

/// Type alias for the SSE frame stream handed to the HTTP layer.
pub type SseStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// Per-request identity and options, derived from headers at the HTTP
/// boundary.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub api_key: String,
    pub api_key_hash: String,
    pub idempotency_key: Option<String>,
    pub wire: WireFormat,
    /// Whether conversation persistence applies to this request.
    pub persist: bool,
}

impl RequestContext {
    pub fn new(
        request_id: impl Into<String>,
        api_key: impl Into<String>,
        wire: WireFormat,
        persist: bool,
    ) -> Self {
        let api_key = api_key.into();
        let api_key_hash = api_key_hash(&api_key);
        Self {
            request_id: request_id.into(),
            api_key,
            api_key_hash,
            idempotency_key: None,
            wire,
            persist,
        }
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }
}

/// Conversation plus its message count, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: usize,
}

pub struct Gateway {
    admission: AdmissionController,
    idempotency: IdempotencyStore,
    providers: ProviderRegistry,
    history: Option<ChatHistory>,
    usage: UsageReporter,
    stream_deadline: Duration,
}

impl Gateway {
    /// Assemble the pipeline. Each provider is wrapped with retry and a
    /// per-provider circuit breaker before registration.
    pub fn new(
        config: &GatewayConfig,
        providers: Vec<(String, Arc<dyn Provider>)>,
        store: Option<Arc<dyn ConversationStore>>,
    ) -> Result<Self> {
        let breakers = BreakerRegistry::new(config.breaker.clone());
        let retry = RetryPolicy::new(&config.retry);

        let mut registry = ProviderRegistry::new(config.providers.default.clone());
        for (name, provider) in providers {
            let resilient = ResilientClient::new(
                provider,
                breakers.for_provider(&name),
                retry.clone(),
            );
            registry.register(name, Arc::new(resilient));
        }

        Ok(Self {
            admission: AdmissionController::new(&config.admission),
            idempotency: IdempotencyStore::new(&config.idempotency),
            providers: registry,
            history: store.map(ChatHistory::new),
            usage: UsageReporter::new(&config.billing)?,
            stream_deadline: Duration::from_secs(config.streaming.deadline_secs),
        })
    }

    fn history_for(&self, ctx: &RequestContext) -> Option<&ChatHistory> {
        if ctx.persist {
            self.history.as_ref()
        } else {
            None
        }
    }

    /// Buffered chat completion. Returns the serialized response body so
    /// idempotent replays are byte-identical.
    pub async fn chat(&self, req: ChatRequest, ctx: &RequestContext) -> Result<String> {
        validate_chat_request(&req)?;
        self.admission.acquire(&ctx.api_key).await;

        // Idempotency applies only to non-streamed requests.
        if let Some(key) = &ctx.idempotency_key
            && let Some(cached) = self.idempotency.get(key).await
        {
            return Ok(cached);
        }

        let (provider, normalized) = self.providers.resolve(&req.model)?;
        let mut req = req;
        req.model = normalized.clone();

        let history = self.history_for(ctx);
        let conversation_id = match history {
            Some(history) => {
                history
                    .record_incoming(
                        req.conversation_id.as_deref(),
                        &req.messages,
                        &normalized,
                        &ctx.request_id,
                        &ctx.api_key_hash,
                    )
                    .await
            }
            None => None,
        };

        let start = Instant::now();
        let res = provider.generate(&req).await.inspect_err(|e| {
            error!(request_id = %ctx.request_id, error = %e, "Provider call failed");
        })?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if let (Some(history), Some(conversation_id)) = (history, conversation_id) {
            history
                .record_outgoing(
                    conversation_id,
                    res.content.clone(),
                    OutgoingMeta {
                        model: Some(res.model.clone()),
                        request_id: Some(ctx.request_id.clone()),
                        finish_reason: res.finish_reason.clone(),
                        prompt_tokens: usage_field(&res.usage, "prompt_tokens"),
                        completion_tokens: usage_field(&res.usage, "completion_tokens"),
                        total_tokens: usage_field(&res.usage, "total_tokens"),
                        elapsed_ms: Some(elapsed_ms),
                    },
                )
                .await;
        }

        let body = MessagesResponse {
            id: res.id,
            model: res.model,
            created: res.created,
            content: res.content,
            finish_reason: res.finish_reason,
            usage: res.usage.clone(),
            conversation_id: conversation_id.map(|id| id.to_string()),
        };
        let body = serde_json::to_string(&body)?;

        if let Some(key) = &ctx.idempotency_key {
            self.idempotency.put(key, body.clone()).await;
        }

        let usage = self.usage.clone();
        let event = UsageEvent {
            request_id: ctx.request_id.clone(),
            api_key_hash: ctx.api_key_hash.clone(),
            model: req.model,
            stream: false,
            usage: res.usage,
            tokens_count_approx: None,
            elapsed_ms,
        };
        tokio::spawn(async move { usage.report(event).await });

        Ok(body)
    }

    /// Streamed chat completion. Resolves once the upstream stream is
    /// established; the returned stream yields SSE frames and closes with
    /// the terminal sentinel on every exit path.
    pub async fn chat_stream(&self, req: ChatRequest, ctx: &RequestContext) -> Result<SseStream> {
        validate_chat_request(&req)?;
        self.admission.acquire(&ctx.api_key).await;

        let (provider, normalized) = self.providers.resolve(&req.model)?;
        let mut req = req;
        req.model = normalized.clone();

        let history = self.history_for(ctx);
        let conversation_id = match history {
            Some(history) => {
                history
                    .record_incoming(
                        req.conversation_id.as_deref(),
                        &req.messages,
                        &normalized,
                        &ctx.request_id,
                        &ctx.api_key_hash,
                    )
                    .await
            }
            None => None,
        };

        let upstream = provider.generate_stream(&req).await.inspect_err(|e| {
            error!(request_id = %ctx.request_id, error = %e, "Stream establishment failed");
        })?;

        info!(request_id = %ctx.request_id, model = %req.model, "Streaming response started");

        let transcoder = StreamTranscoder::new(
            ctx.wire,
            self.stream_deadline,
            ctx.request_id.clone(),
        )
        .with_conversation(conversation_id);

        // The hook runs after the sentinel, on a detached task with a
        // freshly acquired store handle; the request scope is gone by then.
        let store_handle = history.map(ChatHistory::store);
        let usage = self.usage.clone();
        let request_id = ctx.request_id.clone();
        let key_hash = ctx.api_key_hash.clone();
        let model = req.model.clone();

        let hook: CompletionHook = Box::new(move |summary| {
            tokio::spawn(async move {
                if let (Some(store), Some(conversation_id)) = (store_handle, conversation_id)
                    && !summary.content.is_empty()
                {
                    ChatHistory::new(store)
                        .record_outgoing(
                            conversation_id,
                            summary.content,
                            OutgoingMeta {
                                model: summary.model.or_else(|| Some(model.clone())),
                                request_id: Some(request_id.clone()),
                                finish_reason: summary.finish_reason,
                                elapsed_ms: Some(summary.elapsed_ms),
                                ..Default::default()
                            },
                        )
                        .await;
                }

                usage
                    .report(UsageEvent {
                        request_id,
                        api_key_hash: key_hash,
                        model,
                        stream: true,
                        usage: None,
                        tokens_count_approx: Some(summary.chunks_with_delta),
                        elapsed_ms: summary.elapsed_ms,
                    })
                    .await;
            });
        });

        Ok(Box::pin(transcoder.transcode(upstream, hook)))
    }

    /// Conversations owned by the presenting key, most recent first.
    pub async fn list_conversations(
        &self,
        ctx: &RequestContext,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>> {
        let store = self.store()?;
        let conversations = store
            .list_conversations(&ctx.api_key_hash, skip, limit)
            .await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let message_count = store.count_messages(conversation.id).await?;
            summaries.push(ConversationSummary {
                conversation,
                message_count,
            });
        }
        Ok(summaries)
    }

    /// A conversation with all its messages, subject to ownership.
    pub async fn conversation_history(
        &self,
        id: &str,
        ctx: &RequestContext,
    ) -> Result<(Conversation, Vec<StoredMessage>)> {
        let store = self.store()?;
        let conversation = self.authorized_conversation(&store, id, ctx).await?;
        let messages = store.messages(conversation.id).await?;
        Ok((conversation, messages))
    }

    pub async fn rename_conversation(
        &self,
        id: &str,
        title: String,
        ctx: &RequestContext,
    ) -> Result<Conversation> {
        let store = self.store()?;
        let conversation = self.authorized_conversation(&store, id, ctx).await?;
        store
            .update_title(conversation.id, title)
            .await?
            .ok_or_else(|| GatewayError::NotFound("Conversation not found".into()))
    }

    pub async fn delete_conversation(&self, id: &str, ctx: &RequestContext) -> Result<()> {
        let store = self.store()?;
        let conversation = self.authorized_conversation(&store, id, ctx).await?;
        if !store.delete_conversation(conversation.id).await? {
            return Err(GatewayError::NotFound("Conversation not found".into()));
        }
        Ok(())
    }

    fn store(&self) -> Result<Arc<dyn ConversationStore>> {
        self.history
            .as_ref()
            .map(ChatHistory::store)
            .ok_or_else(|| GatewayError::NotFound("Conversation history is disabled".into()))
    }

    async fn authorized_conversation(
        &self,
        store: &Arc<dyn ConversationStore>,
        id: &str,
        ctx: &RequestContext,
    ) -> Result<Conversation> {
        let id = Uuid::parse_str(id)
            .map_err(|_| GatewayError::InvalidRequest("Invalid conversation ID format".into()))?;

        let conversation = store
            .get_conversation(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound("Conversation not found".into()))?;

        if !conversation.owned_by(&ctx.api_key_hash) {
            return Err(GatewayError::AccessDenied(
                "Access denied to this conversation".into(),
            ));
        }

        Ok(conversation)
    }
}

fn usage_field(usage: &Option<crate::models::Usage>, field: &str) -> Option<u64> {
    usage.as_ref().and_then(|u| u.get(field).copied().flatten())
}
