use futures::Stream;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::models::{ChatRequest, ChatResponseChunk, ChatResponseFull};

/// Type alias for the lazy, finite, one-shot chunk sequence a provider
/// yields for a streamed completion.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatResponseChunk>> + Send>>;

/// Type alias for the future returned by `generate_stream`.
pub type StreamFuture = Pin<Box<dyn Future<Output = Result<ChunkStream>> + Send>>;

/// Type alias for the future returned by `generate`.
pub type GenerateFuture = Pin<Box<dyn Future<Output = Result<ChatResponseFull>> + Send>>;

/// Capability implemented by upstream language-model providers.
pub trait Provider: Send + Sync {
    /// Buffered completion: one request, one full response.
    fn generate(&self, req: &ChatRequest) -> GenerateFuture;

    /// Streamed completion: resolves to a chunk stream once the upstream
    /// call is established.
    fn generate_stream(&self, req: &ChatRequest) -> StreamFuture;

    /// Provider identity, used for breaker keying and logging.
    fn name(&self) -> &str;
}

/// Maps model-id prefixes to provider handles.
///
/// A `<provider>:` prefix selects the matching registered provider and the
/// id passes through unchanged. A bare id (or an unrecognized prefix) is
/// routed to the default provider and requalified with its prefix, so
/// `gpt-4o-mini` resolves the same way `openai:gpt-4o-mini` does.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    default: String,
}

impl ProviderRegistry {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default: default.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Resolve a model id to `(provider, normalized_model_id)`.
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn Provider>, String)> {
        if let Some((prefix, _)) = model.split_once(':')
            && let Some(provider) = self.providers.get(prefix)
        {
            return Ok((provider.clone(), model.to_string()));
        }

        // Bare ids and unknown prefixes fall back to the default provider.
        let provider = self.providers.get(&self.default).ok_or_else(|| {
            GatewayError::ConfigError(format!("Default provider {} not registered", self.default))
        })?;
        Ok((provider.clone(), format!("{}:{}", self.default, model)))
    }
}
