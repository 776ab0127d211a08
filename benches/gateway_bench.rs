use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

use llm_gateway::error::{GatewayError, Result};
use llm_gateway::history::derive_title;
use llm_gateway::models::*;
use llm_gateway::provider::{ChunkStream, GenerateFuture, Provider, ProviderRegistry, StreamFuture};
use llm_gateway::util::api_key_hash;

struct NoopProvider;

impl Provider for NoopProvider {
    fn generate(&self, _req: &ChatRequest) -> GenerateFuture {
        Box::pin(async { Err(GatewayError::Upstream("noop".into())) })
    }

    fn generate_stream(&self, _req: &ChatRequest) -> StreamFuture {
        Box::pin(async { Ok(Box::pin(futures::stream::empty()) as ChunkStream) })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn sample_request() -> ChatRequest {
    ChatRequest {
        model: "openai:gpt-4o-mini".to_string(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: "You are a helpful assistant".to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: "What is Rust?".to_string(),
            },
            ChatMessage {
                role: "assistant".to_string(),
                content: "Rust is a systems programming language.".to_string(),
            },
        ],
        temperature: 0.7,
        max_tokens: Some(500),
        stream: false,
        conversation_id: None,
    }
}

fn benchmark_request_validation(c: &mut Criterion) {
    let req = sample_request();

    c.bench_function("validate_chat_request", |b| {
        b.iter(|| {
            black_box(validate_chat_request(&req)).unwrap();
        });
    });
}

fn benchmark_provider_resolution(c: &mut Criterion) {
    let mut registry = ProviderRegistry::new("openai");
    registry.register("openai", Arc::new(NoopProvider));

    let models = ["openai:gpt-4o-mini", "gpt-4o", "acme:gpt-9"];

    c.bench_function("resolve_model_id", |b| {
        b.iter(|| {
            for model in &models {
                let _: Result<_> = black_box(registry.resolve(model));
            }
        });
    });
}

fn benchmark_title_derivation(c: &mut Criterion) {
    let short = sample_request().messages;
    let long = vec![ChatMessage {
        role: "user".to_string(),
        content: "x".repeat(400),
    }];

    c.bench_function("derive_title", |b| {
        b.iter(|| {
            black_box(derive_title(&short));
            black_box(derive_title(&long));
        });
    });
}

fn benchmark_api_key_hashing(c: &mut Criterion) {
    c.bench_function("api_key_hash", |b| {
        b.iter(|| {
            black_box(api_key_hash("tenant-a-key-0123456789"));
        });
    });
}

fn benchmark_response_serialization(c: &mut Criterion) {
    let body = MessagesResponse {
        id: "chatcmpl-1".to_string(),
        model: "gpt-4o-mini".to_string(),
        created: 1700000000,
        content: "Rust is a systems programming language.".to_string(),
        finish_reason: Some("stop".to_string()),
        usage: None,
        conversation_id: Some("5a2f7c3e-9f10-4b3a-8a57-6f3f1c2d4e5f".to_string()),
    };

    c.bench_function("serialize_response_body", |b| {
        b.iter(|| {
            black_box(serde_json::to_string(&body).unwrap());
        });
    });
}

criterion_group!(
    benches,
    benchmark_request_validation,
    benchmark_provider_resolution,
    benchmark_title_derivation,
    benchmark_api_key_hashing,
    benchmark_response_serialization
);
criterion_main!(benches);
