//! Stream transcoding: provider chunk sequence in, SSE wire events out.
//!
//! The transcoder consumes the upstream chunk stream under a global
//! per-stream deadline and emits `data: <json>\n\n` frames in the
//! requested dialect, closing every stream with exactly one terminal
//! `data: [DONE]\n\n` sentinel regardless of how it ends. Mid-stream
//! provider failures and deadline expiry surface as one in-band error
//! event (generic, no upstream detail) ahead of the sentinel; HTTP
//! headers are committed by then, so there is no status code to change.
//!
//! Accumulated text and outcome metadata are handed to a completion hook
//! after the sentinel, which is where persistence and billing attach.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::error;
use uuid::Uuid;

use crate::models::ChatResponseChunk;
use crate::provider::ChunkStream;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Which SSE dialect the client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Canonical,
    OpenAi,
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
    TimedOut,
}

/// What the transcoder saw, handed to the completion hook after the
/// terminal sentinel.
pub struct StreamSummary {
    pub content: String,
    pub chunks_with_delta: u64,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    pub outcome: StreamOutcome,
    pub elapsed_ms: u64,
}

pub type CompletionHook = Box<dyn FnOnce(StreamSummary) + Send>;

pub struct StreamTranscoder {
    format: WireFormat,
    deadline: Duration,
    conversation_id: Option<Uuid>,
    request_id: String,
}

impl StreamTranscoder {
    pub fn new(format: WireFormat, deadline: Duration, request_id: impl Into<String>) -> Self {
        Self {
            format,
            deadline,
            conversation_id: None,
            request_id: request_id.into(),
        }
    }

    /// Attach a resolved conversation id; it rides on the first emitted
    /// data event only.
    pub fn with_conversation(mut self, conversation_id: Option<Uuid>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Drive the upstream chunk stream to exhaustion, error, or deadline,
    /// yielding SSE frames. `on_complete` runs exactly once, after the
    /// sentinel has been emitted.
    pub fn transcode(
        self,
        mut upstream: ChunkStream,
        on_complete: CompletionHook,
    ) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
        let Self {
            format,
            deadline,
            conversation_id,
            request_id,
        } = self;

        async_stream::stream! {
            let start = Instant::now();
            let expiry = tokio::time::sleep(deadline);
            tokio::pin!(expiry);

            let mut content = String::new();
            let mut chunks_with_delta = 0u64;
            let mut model = None;
            let mut finish_reason = None;
            let mut first_event = true;
            let outcome;

            loop {
                // Yields live outside the select so the generator
                // transform stays out of the macro's arms.
                let step = tokio::select! {
                    _ = &mut expiry => None,
                    item = upstream.next() => Some(item),
                };

                match step {
                    None => {
                        error!(
                            request_id = %request_id,
                            deadline_secs = deadline.as_secs(),
                            "Stream deadline exceeded, abandoning upstream"
                        );
                        yield Ok(frame(&timeout_event(format)));
                        yield Ok(Bytes::from_static(DONE_FRAME.as_bytes()));
                        outcome = StreamOutcome::TimedOut;
                        break;
                    }
                    Some(None) => {
                        yield Ok(Bytes::from_static(DONE_FRAME.as_bytes()));
                        outcome = StreamOutcome::Completed;
                        break;
                    }
                    Some(Some(Ok(chunk))) => {
                        if !chunk.delta.is_empty() {
                            chunks_with_delta += 1;
                            content.push_str(&chunk.delta);
                        }
                        model = Some(chunk.model.clone());
                        if chunk.finish_reason.is_some() {
                            finish_reason = chunk.finish_reason.clone();
                        }

                        let conv = if first_event { conversation_id } else { None };
                        first_event = false;
                        yield Ok(frame(&chunk_event(format, &chunk, conv)));
                    }
                    Some(Some(Err(e))) => {
                        // Raw detail stays in the log; the wire gets a
                        // generic event.
                        error!(request_id = %request_id, error = %e, "Error during streaming");
                        yield Ok(frame(&error_event(format)));
                        yield Ok(Bytes::from_static(DONE_FRAME.as_bytes()));
                        outcome = StreamOutcome::Failed;
                        break;
                    }
                }
            }

            on_complete(StreamSummary {
                content,
                chunks_with_delta,
                model,
                finish_reason,
                outcome,
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }
    }
}

fn frame(data: &serde_json::Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", data))
}

fn chunk_event(
    format: WireFormat,
    chunk: &ChatResponseChunk,
    conversation_id: Option<Uuid>,
) -> serde_json::Value {
    match format {
        WireFormat::Canonical => {
            let mut data = serde_json::json!({
                "id": chunk.id,
                "model": chunk.model,
                "created": chunk.created,
                "delta": chunk.delta,
                "finish_reason": chunk.finish_reason,
            });
            if let Some(conv) = conversation_id {
                data["conversation_id"] = serde_json::Value::String(conv.to_string());
            }
            data
        }
        WireFormat::OpenAi => serde_json::json!({
            "id": chunk.id,
            "object": "chat.completion.chunk",
            "created": chunk.created,
            "model": chunk.model,
            "choices": [{
                "index": 0,
                "delta": { "content": chunk.delta },
                "finish_reason": chunk.finish_reason,
            }],
        }),
    }
}

fn error_event(format: WireFormat) -> serde_json::Value {
    match format {
        WireFormat::Canonical => serde_json::json!({
            "error": "streaming error occurred",
        }),
        WireFormat::OpenAi => serde_json::json!({
            "error": {
                "message": "streaming error occurred",
                "type": "streaming_error",
            }
        }),
    }
}

fn timeout_event(format: WireFormat) -> serde_json::Value {
    match format {
        WireFormat::Canonical => serde_json::json!({
            "error": "stream timeout exceeded",
        }),
        WireFormat::OpenAi => serde_json::json!({
            "error": {
                "message": "stream timeout exceeded",
                "type": "timeout_error",
            }
        }),
    }
}
