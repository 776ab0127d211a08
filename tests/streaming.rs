//! Streaming transport tests through the full gateway: sentinel
//! guarantees on every exit path, conversation-id placement, wire
//! dialects, and post-stream persistence.

mod common;

use common::{
    MockProvider, StreamScript, chunk, drain_background_tasks, gateway_with, user_request,
};
use futures::StreamExt;
use llm_gateway::error::GatewayError;
use llm_gateway::gateway::RequestContext;
use llm_gateway::store::ConversationStore;
use llm_gateway::stream::WireFormat;

const DONE_FRAME: &str = "data: [DONE]\n\n";

fn ctx(wire: WireFormat, persist: bool) -> RequestContext {
    RequestContext::new("req-s1", "public", wire, persist)
}

async fn collect_frames(
    stream: llm_gateway::gateway::SseStream,
) -> Vec<String> {
    stream
        .map(|item| String::from_utf8(item.unwrap().to_vec()).unwrap())
        .collect()
        .await
}

fn sentinel_count(frames: &[String]) -> usize {
    frames.iter().filter(|f| f.as_str() == DONE_FRAME).count()
}

fn parse_event(frame: &str) -> serde_json::Value {
    serde_json::from_str(frame.strip_prefix("data: ").unwrap().trim_end()).unwrap()
}

#[tokio::test]
async fn test_success_path_emits_exactly_one_sentinel() {
    let t = gateway_with(MockProvider::new().with_stream(StreamScript::Chunks(vec![
        chunk("Hel", None),
        chunk("lo", Some("stop")),
    ])));

    let stream = t
        .gateway
        .chat_stream(user_request("hi", true), &ctx(WireFormat::Canonical, true))
        .await
        .unwrap();
    let frames = collect_frames(stream).await;

    assert_eq!(sentinel_count(&frames), 1);
    assert_eq!(frames.last().unwrap(), DONE_FRAME);
}

#[tokio::test]
async fn test_provider_error_path_emits_exactly_one_sentinel() {
    let t = gateway_with(MockProvider::new().with_stream(StreamScript::Chunks(vec![
        chunk("partial", None),
        Err(GatewayError::Upstream("socket reset by upstream".into())),
    ])));

    let stream = t
        .gateway
        .chat_stream(user_request("hi", true), &ctx(WireFormat::Canonical, true))
        .await
        .unwrap();
    let frames = collect_frames(stream).await;

    assert_eq!(sentinel_count(&frames), 1);
    assert_eq!(frames.last().unwrap(), DONE_FRAME);

    // Generic in-band error, no raw upstream detail.
    let error_frame = &frames[frames.len() - 2];
    assert!(error_frame.contains("streaming error occurred"));
    assert!(!error_frame.contains("socket reset"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_path_emits_exactly_one_sentinel() {
    let t = gateway_with(MockProvider::new().with_stream(StreamScript::Stalled));

    let stream = t
        .gateway
        .chat_stream(user_request("hi", true), &ctx(WireFormat::Canonical, true))
        .await
        .unwrap();
    let frames = collect_frames(stream).await;

    assert_eq!(frames.len(), 2);
    assert!(frames[0].contains("stream timeout exceeded"));
    assert_eq!(frames[1], DONE_FRAME);
}

#[tokio::test]
async fn test_establishment_failure_returns_error_not_stream() {
    let t = gateway_with(MockProvider::new().with_stream(StreamScript::EstablishError(
        GatewayError::Upstream("401 unauthorized".into()),
    )));

    // Establishment errors happen before headers are committed, so they
    // surface as a plain error response, not as in-band events.
    let err = t
        .gateway
        .chat_stream(user_request("hi", true), &ctx(WireFormat::Canonical, true))
        .await
        .err()
        .expect("establishment failure must not produce a stream");
    assert_eq!(err.public_message(), "upstream error");
}

#[tokio::test]
async fn test_first_chunk_carries_conversation_id_once() {
    let t = gateway_with(MockProvider::new().with_stream(StreamScript::Chunks(vec![
        chunk("a", None),
        chunk("b", None),
        chunk("", Some("stop")),
    ])));

    let stream = t
        .gateway
        .chat_stream(user_request("hi", true), &ctx(WireFormat::Canonical, true))
        .await
        .unwrap();
    let frames = collect_frames(stream).await;

    let first = parse_event(&frames[0]);
    let conversation_id = first["conversation_id"]
        .as_str()
        .expect("first chunk carries conversation_id")
        .to_string();
    assert!(!conversation_id.is_empty());

    for frame in &frames[1..] {
        assert!(!frame.contains(&conversation_id));
    }
}

#[tokio::test]
async fn test_no_conversation_id_when_persistence_inactive() {
    let t = gateway_with(
        MockProvider::new().with_stream(StreamScript::Chunks(vec![chunk("a", Some("stop"))])),
    );

    let stream = t
        .gateway
        .chat_stream(user_request("hi", true), &ctx(WireFormat::OpenAi, false))
        .await
        .unwrap();
    let frames = collect_frames(stream).await;

    for frame in &frames {
        assert!(!frame.contains("conversation_id"));
    }
}

#[tokio::test]
async fn test_openai_dialect_chunk_shape() {
    let t = gateway_with(
        MockProvider::new().with_stream(StreamScript::Chunks(vec![chunk("hello", Some("stop"))])),
    );

    let stream = t
        .gateway
        .chat_stream(user_request("hi", true), &ctx(WireFormat::OpenAi, false))
        .await
        .unwrap();
    let frames = collect_frames(stream).await;

    let event = parse_event(&frames[0]);
    assert_eq!(event["object"], "chat.completion.chunk");
    assert_eq!(event["choices"][0]["index"], 0);
    assert_eq!(event["choices"][0]["delta"]["content"], "hello");
    assert_eq!(event["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_assistant_message_persisted_after_stream_completes() {
    let t = gateway_with(MockProvider::new().with_stream(StreamScript::Chunks(vec![
        chunk("Hel", None),
        chunk("lo", Some("stop")),
    ])));

    let stream = t
        .gateway
        .chat_stream(user_request("hi", true), &ctx(WireFormat::Canonical, true))
        .await
        .unwrap();
    let frames = collect_frames(stream).await;

    let conversation_id = parse_event(&frames[0])["conversation_id"]
        .as_str()
        .unwrap()
        .to_string();
    let conv_uuid = uuid::Uuid::parse_str(&conversation_id).unwrap();

    // Outgoing persistence runs on a detached task after the sentinel.
    drain_background_tasks().await;

    let messages = t.store.messages(conv_uuid).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "Hello");
    assert_eq!(messages[1].finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn test_streamed_requests_bypass_idempotency_cache() {
    let t = gateway_with(
        MockProvider::new()
            .with_stream(StreamScript::Chunks(vec![chunk("one", Some("stop"))]))
            .with_stream(StreamScript::Chunks(vec![chunk("two", Some("stop"))])),
    );

    // Same idempotency key on both; streamed calls always execute fresh.
    let ctx = ctx(WireFormat::Canonical, false).with_idempotency_key(Some("idem-1".to_string()));

    let first = collect_frames(
        t.gateway
            .chat_stream(user_request("hi", true), &ctx)
            .await
            .unwrap(),
    )
    .await;
    let second = collect_frames(
        t.gateway
            .chat_stream(user_request("hi", true), &ctx)
            .await
            .unwrap(),
    )
    .await;

    assert!(first[0].contains("one"));
    assert!(second[0].contains("two"));
    assert_eq!(t.provider.calls(), 2);
}
