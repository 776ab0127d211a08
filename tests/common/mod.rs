//! Shared test fixtures: a scripted mock provider and gateway builders.
#![allow(dead_code)]

use futures::stream;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use llm_gateway::config::{
    AdmissionConfig, BillingConfig, BreakerConfig, GatewayConfig, IdempotencyConfig, OpenAiConfig,
    ProvidersConfig, RetryConfig, ServerConfig, StreamingConfig,
};
use llm_gateway::error::{GatewayError, Result};
use llm_gateway::gateway::Gateway;
use llm_gateway::models::{ChatMessage, ChatRequest, ChatResponseChunk, ChatResponseFull};
use llm_gateway::provider::{ChunkStream, GenerateFuture, Provider, StreamFuture};
use llm_gateway::store::{ConversationStore, MemoryStore};

/// One scripted streaming outcome.
pub enum StreamScript {
    /// Establishment succeeds and the stream plays these items.
    Chunks(Vec<Result<ChatResponseChunk>>),
    /// Establishment succeeds but the stream never yields.
    Stalled,
    /// Establishment itself fails.
    EstablishError(GatewayError),
}

/// Provider that plays back scripted outcomes and counts invocations.
pub struct MockProvider {
    buffered: Mutex<VecDeque<Result<ChatResponseFull>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            buffered: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(self, content: &str) -> Self {
        self.buffered
            .lock()
            .unwrap()
            .push_back(Ok(full_response(content)));
        self
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.buffered
            .lock()
            .unwrap()
            .push_back(Err(GatewayError::Upstream(message.to_string())));
        self
    }

    pub fn with_stream(self, script: StreamScript) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for MockProvider {
    fn generate(&self, _req: &ChatRequest) -> GenerateFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .buffered
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Upstream("mock script exhausted".into())));
        Box::pin(async move { outcome })
    }

    fn generate_stream(&self, _req: &ChatRequest) -> StreamFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StreamScript::EstablishError(GatewayError::Upstream(
                "mock script exhausted".into(),
            )));
        Box::pin(async move {
            match script {
                StreamScript::Chunks(items) => {
                    Ok(Box::pin(stream::iter(items)) as ChunkStream)
                }
                StreamScript::Stalled => Ok(Box::pin(stream::pending()) as ChunkStream),
                StreamScript::EstablishError(e) => Err(e),
            }
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

pub fn chunk(delta: &str, finish: Option<&str>) -> Result<ChatResponseChunk> {
    Ok(ChatResponseChunk {
        id: "chatcmpl-1".to_string(),
        model: "gpt-4o-mini".to_string(),
        created: 1700000000,
        delta: delta.to_string(),
        finish_reason: finish.map(str::to_string),
        usage: None,
    })
}

pub fn full_response(content: &str) -> ChatResponseFull {
    ChatResponseFull {
        id: "chatcmpl-1".to_string(),
        model: "gpt-4o-mini".to_string(),
        created: 1700000000,
        content: content.to_string(),
        finish_reason: Some("stop".to_string()),
        usage: Some(std::collections::HashMap::from([
            ("prompt_tokens".to_string(), Some(3u64)),
            ("completion_tokens".to_string(), Some(5u64)),
            ("total_tokens".to_string(), Some(8u64)),
        ])),
    }
}

pub fn user_request(content: &str, stream: bool) -> ChatRequest {
    ChatRequest {
        model: "openai:gpt-4o-mini".to_string(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        }],
        temperature: 0.7,
        max_tokens: None,
        stream,
        conversation_id: None,
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        server: ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            history_enabled: true,
        },
        admission: AdmissionConfig {
            requests_per_window: 100,
            window_secs: 60,
        },
        idempotency: IdempotencyConfig::default(),
        retry: RetryConfig::default(),
        breaker: BreakerConfig::default(),
        streaming: StreamingConfig { deadline_secs: 300 },
        billing: BillingConfig::default(),
        providers: ProvidersConfig {
            default: "openai".to_string(),
            openai: OpenAiConfig {
                api_key: "test-key".to_string(),
                endpoint: "https://api.openai.com".to_string(),
                timeout_secs: 120,
            },
        },
    }
}

pub struct TestGateway {
    pub gateway: Gateway,
    pub provider: Arc<MockProvider>,
    pub store: Arc<MemoryStore>,
}

pub fn gateway_with(provider: MockProvider) -> TestGateway {
    gateway_with_config(provider, test_config())
}

pub fn gateway_with_config(provider: MockProvider, config: GatewayConfig) -> TestGateway {
    let provider = Arc::new(provider);
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::new(
        &config,
        vec![("openai".to_string(), provider.clone() as Arc<dyn Provider>)],
        Some(store.clone() as Arc<dyn ConversationStore>),
    )
    .unwrap();
    TestGateway {
        gateway,
        provider,
        store,
    }
}

/// Let detached persistence/billing tasks run to completion.
pub async fn drain_background_tasks() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
