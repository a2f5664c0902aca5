use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde_json::json;
use tracing::warn;

use crate::errors::AppError;
use crate::models::ChatRequest;
use crate::service::chat_service::ChatService;

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST `/api/messages/stream` — streams the assistant reply as Server-Sent Events.
///
/// Each event's data is one JSON chunk `{type, content?, conversation_id?, message_id?}`;
/// the stream ends right after a `done` or `error` chunk. Requests rejected
/// before streaming starts get a plain JSON error with a matching status.
pub async fn stream_message_handler(
    State(svc): State<ChatService>,
    Json(request): Json<ChatRequest>,
) -> Response {
    match svc.start_chat(request).await {
        Err(err) => error_response(&err),
        Ok(stream) => {
            let events = stream.map(|chunk| Event::default().json_data(&chunk));
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
    }
}

/// GET `/api/conversations` — conversations, most recently active first
pub async fn list_conversations_handler(State(svc): State<ChatService>) -> Response {
    match svc.get_conversations().await {
        Ok(convs) => Json(convs).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/api/conversations/{id}/messages` — messages of one conversation, oldest first
pub async fn list_messages_handler(
    Path(id): Path<i64>,
    State(svc): State<ChatService>,
) -> Response {
    match svc.get_messages(id).await {
        Ok(msgs) => Json(msgs).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/health`
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

// ── Helper ────────────────────────────────────────────────────────────────────

fn status_for(err: &AppError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_conflict() {
        StatusCode::CONFLICT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(err: &AppError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        warn!("Request failed: {err}");
    }
    (status, Json(json!({ "detail": err.to_string() }))).into_response()
}
