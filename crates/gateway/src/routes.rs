//! Chat and stream handlers.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use toolrelay_core::message::{Message, Role, ThreadId};
use toolrelay_core::store::Chat;
use toolrelay_protocol::codec::encode_frame;
use toolrelay_protocol::request::{ChatStreamRequest, CreateChatRequest};
use tracing::{info, warn};

use crate::{ApiError, AuthUser, SharedState};

const DEFAULT_TITLE: &str = "New chat";

pub async fn create_chat(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(payload): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    let title = payload
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let chat = state.store.create_chat(&user, &title).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_chats(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    Ok(Json(state.store.list_chats(&user).await?))
}

pub async fn delete_chat(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let chat_id = ThreadId::from(id);
    state.store.delete_chat(&user, &chat_id).await?;
    let checkpoints = state.orchestrator.checkpoints();
    if let Err(e) = checkpoints.remove(&chat_id).await {
        warn!(
            chat_id = %chat_id,
            store = checkpoints.name(),
            error = %e,
            "Checkpoint removal failed"
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn chat_messages(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let chat = state.store.authorize(&user, &ThreadId::from(id)).await?;
    Ok(Json(state.store.messages(&chat.id).await?))
}

/// `POST /api/chat/stream`: authorize, store the user message, then stream
/// the run as frames.
pub async fn chat_stream(
    State(state): State<SharedState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(payload): Json<ChatStreamRequest>,
) -> Result<Response, ApiError> {
    if payload.new_message.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "new_message must not be empty"));
    }

    let chat = state.store.authorize(&user, &ThreadId::from(payload.chat_id)).await?;

    let history: Vec<Message> = match payload.messages {
        Some(entries) => entries.into_iter().filter_map(|e| e.into_message()).collect(),
        None => state
            .store
            .messages(&chat.id)
            .await?
            .into_iter()
            .filter(|m| matches!(m.role(), Role::User | Role::Assistant))
            .collect(),
    };

    let user_message = Message::user(payload.new_message);
    state.store.append_message(&chat.id, user_message.clone()).await?;

    info!(chat_id = %chat.id, user = %user, history = history.len(), "Chat stream started");
    let events = state.orchestrator.run(chat.id, history, user_message);

    let frames = ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(encode_frame(&event)));
    let mut response = Body::from_stream(frames).into_response();

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));

    Ok(response)
}
