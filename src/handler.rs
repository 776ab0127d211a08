use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Response, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::gateway::{Gateway, RequestContext, SseStream};
use crate::models::{
    ChatMessage, ChatRequest, MessagesResponse, OaChatCompletionRequest, OaChatCompletionResponse,
    OaChoice,
};
use crate::stream::WireFormat;

pub struct AppState {
    pub gateway: Gateway,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/messages", post(create_message))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/conversations", get(list_conversations))
        .route(
            "/v1/conversations/{id}",
            get(get_conversation)
                .patch(rename_conversation)
                .delete(delete_conversation),
        )
        .with_state(state)
}

/// Propagate the inbound request id or mint one.
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Client key; absent header means the shared "public" budget.
fn api_key(headers: &HeaderMap) -> String {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("public")
        .to_string()
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn json_response(request_id: &str, body: String) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-request-id", request_id)
        .body(Body::from(body))
        .expect("static response parts")
}

fn sse_response(request_id: &str, stream: SseStream) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .header("x-request-id", request_id)
        .body(Body::from_stream(stream))
        .expect("static response parts")
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Canonical endpoint; conversation persistence is active here.
async fn create_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Response<Body>> {
    let ctx = RequestContext::new(
        request_id(&headers),
        api_key(&headers),
        WireFormat::Canonical,
        true,
    )
    .with_idempotency_key(idempotency_key(&headers).filter(|_| !payload.stream));

    if payload.stream {
        let stream = state.gateway.chat_stream(payload, &ctx).await?;
        return Ok(sse_response(&ctx.request_id, stream));
    }

    let body = state.gateway.chat(payload, &ctx).await?;
    Ok(json_response(&ctx.request_id, body))
}

/// OpenAI-compatible shim; requests map 1:1 onto the canonical shape.
/// No conversation persistence on this endpoint.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<OaChatCompletionRequest>,
) -> Result<Response<Body>> {
    let ctx = RequestContext::new(
        request_id(&headers),
        api_key(&headers),
        WireFormat::OpenAi,
        false,
    )
    .with_idempotency_key(idempotency_key(&headers).filter(|_| !payload.stream));

    let canonical = payload.into_canonical();

    if canonical.stream {
        let stream = state.gateway.chat_stream(canonical, &ctx).await?;
        return Ok(sse_response(&ctx.request_id, stream));
    }

    let body = state.gateway.chat(canonical, &ctx).await?;
    let canonical_body: MessagesResponse = serde_json::from_str(&body)?;

    let oa = OaChatCompletionResponse {
        id: canonical_body.id,
        object: "chat.completion".to_string(),
        created: canonical_body.created,
        model: canonical_body.model,
        choices: vec![OaChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: canonical_body.content,
            },
            finish_reason: canonical_body.finish_reason,
        }],
        usage: canonical_body.usage,
    };

    Ok(json_response(&ctx.request_id, serde_json::to_string(&oa)?))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse> {
    let ctx = conversations_ctx(&headers);
    let summaries = state
        .gateway
        .list_conversations(&ctx, params.skip, params.limit.clamp(1, 100))
        .await?;
    Ok(Json(summaries))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let ctx = conversations_ctx(&headers);
    let (conversation, messages) = state.gateway.conversation_history(&id, &ctx).await?;
    let message_count = messages.len();
    Ok(Json(serde_json::json!({
        "conversation": {
            "id": conversation.id,
            "title": conversation.title,
            "created_at": conversation.created_at,
            "updated_at": conversation.updated_at,
            "message_count": message_count,
        },
        "messages": messages,
    })))
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    title: String,
}

async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<impl IntoResponse> {
    let ctx = conversations_ctx(&headers);
    let conversation = state
        .gateway
        .rename_conversation(&id, body.title, &ctx)
        .await?;
    Ok(Json(serde_json::json!({
        "message": "Conversation updated successfully",
        "conversation_id": conversation.id,
    })))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let ctx = conversations_ctx(&headers);
    state.gateway.delete_conversation(&id, &ctx).await?;
    Ok(Json(serde_json::json!({
        "message": "Conversation deleted successfully",
    })))
}

fn conversations_ctx(headers: &HeaderMap) -> RequestContext {
    RequestContext::new(
        request_id(headers),
        api_key(headers),
        WireFormat::Canonical,
        true,
    )
}
