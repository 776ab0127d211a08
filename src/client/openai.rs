use async_stream::try_stream;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::OpenAiConfig;
use crate::error::{GatewayError, Result};
use crate::models::{ChatRequest, ChatResponseChunk, ChatResponseFull, Usage};
use crate::provider::{ChunkStream, GenerateFuture, Provider, StreamFuture};
use crate::util::epoch_secs;

const MODEL_PREFIX: &str = "openai:";

pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Upstream(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
        // Accept "openai:gpt-4o-mini" and send the bare id upstream.
        let model = req.model.strip_prefix(MODEL_PREFIX).unwrap_or(&req.model);
        let mut body = serde_json::json!({
            "model": model,
            "messages": req.messages,
            "temperature": req.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        body
    }

    async fn post(client: Client, url: String, api_key: String, body: serde_json::Value) -> Result<reqwest::Response> {
        let response = client
            .post(&url)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        debug!(status = %status, "OpenAI responded");

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::Upstream(format!(
                "OpenAI API error {}: {}",
                status, error_body
            )));
        }

        Ok(response)
    }

    async fn generate_impl(
        client: Client,
        url: String,
        api_key: String,
        body: serde_json::Value,
    ) -> Result<ChatResponseFull> {
        let created = epoch_secs();
        let response = Self::post(client, url, api_key, body).await?;

        let completion: OaCompletion = response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("Invalid OpenAI response: {}", e)))?;

        let choice = completion.choices.into_iter().next().ok_or_else(|| {
            GatewayError::Upstream("OpenAI response contained no choices".to_string())
        })?;

        Ok(ChatResponseFull {
            id: completion.id,
            model: completion.model,
            created,
            content: choice.message.map(|m| m.content).unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: completion.usage.map(OaUsage::into_usage),
        })
    }

    async fn generate_stream_impl(
        client: Client,
        url: String,
        api_key: String,
        body: serde_json::Value,
    ) -> Result<ChunkStream> {
        let created = epoch_secs();
        let response = Self::post(client, url, api_key, body).await?;

        info!("OpenAI stream established");
        let mut bytes = response.bytes_stream();
        let mut parser = SseLineParser::new();

        let chunks = try_stream! {
            'outer: while let Some(piece) = bytes.next().await {
                let piece = piece
                    .map_err(|e| GatewayError::Upstream(format!("OpenAI stream error: {}", e)))?;
                for data in parser.feed(&piece) {
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let event: OaStreamChunk = serde_json::from_str(&data).map_err(|e| {
                        GatewayError::Upstream(format!("Invalid OpenAI chunk: {}", e))
                    })?;
                    let choice = event.choices.into_iter().next();
                    yield ChatResponseChunk {
                        id: event.id,
                        model: event.model,
                        created,
                        delta: choice
                            .as_ref()
                            .and_then(|c| c.delta.as_ref())
                            .and_then(|d| d.content.clone())
                            .unwrap_or_default(),
                        finish_reason: choice.and_then(|c| c.finish_reason),
                        usage: event.usage.map(OaUsage::into_usage),
                    };
                }
            }
        };

        Ok(Box::pin(chunks))
    }
}

impl Provider for OpenAiClient {
    fn generate(&self, req: &ChatRequest) -> GenerateFuture {
        let url = format!("{}/v1/chat/completions", self.config.endpoint);
        let body = Self::request_body(req, false);
        let client = self.client.clone();
        let api_key = self.config.api_key.clone();

        Box::pin(async move { Self::generate_impl(client, url, api_key, body).await })
    }

    fn generate_stream(&self, req: &ChatRequest) -> StreamFuture {
        let url = format!("{}/v1/chat/completions", self.config.endpoint);
        let body = Self::request_body(req, true);
        let client = self.client.clone();
        let api_key = self.config.api_key.clone();

        Box::pin(async move { Self::generate_stream_impl(client, url, api_key, body).await })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Incremental parser for `data:`-framed SSE lines. Payloads split across
/// network reads are buffered until their newline arrives.
struct SseLineParser {
    buffer: String,
}

impl SseLineParser {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    fn feed(&mut self, piece: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(piece));

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
        }
        out
    }
}

// Upstream wire shapes (subset we consume).

#[derive(Debug, Deserialize)]
struct OaCompletion {
    id: String,
    model: String,
    choices: Vec<OaCompletionChoice>,
    usage: Option<OaUsage>,
}

#[derive(Debug, Deserialize)]
struct OaCompletionChoice {
    message: Option<OaMessageBody>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaMessageBody {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OaStreamChunk {
    id: String,
    model: String,
    choices: Vec<OaStreamChoice>,
    usage: Option<OaUsage>,
}

#[derive(Debug, Deserialize)]
struct OaStreamChoice {
    delta: Option<OaDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl OaUsage {
    fn into_usage(self) -> Usage {
        HashMap::from([
            ("prompt_tokens".to_string(), self.prompt_tokens),
            ("completion_tokens".to_string(), self.completion_tokens),
            ("total_tokens".to_string(), self.total_tokens),
        ])
    }
}
