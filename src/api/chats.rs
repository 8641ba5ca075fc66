//! Collaborator query surface
//!
//! Read endpoints over materialized chats, messages, and media, plus the
//! mark-resolved callback used by an external downloader. Everything here
//! is scoped by client id; the chat id in the path is the canonical form
//! produced at ingest time.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::db::{MediaReference, Message};
use crate::media::DownloadStatus;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Build the query-surface router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/chats/{chat_id}/messages", get(list_messages))
        .route("/messages/{message_id}/media", get(list_media))
        .route("/media/{id}/resolved", post(mark_resolved))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    client_id: String,
    /// Only messages strictly after this timestamp
    after: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct MessageBody {
    message_id: String,
    kind: &'static str,
    content: String,
    from_me: bool,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    poll: Option<serde_json::Value>,
}

impl From<Message> for MessageBody {
    fn from(message: Message) -> Self {
        Self {
            message_id: message.message_id,
            kind: message.kind.as_str(),
            content: message.content,
            from_me: message.from_me,
            timestamp: message.timestamp.to_rfc3339(),
            location: message
                .location_json
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok()),
            poll: message
                .poll_json
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok()),
        }
    }
}

#[derive(Serialize)]
struct MediaBody {
    id: String,
    media_type: &'static str,
    mimetype: String,
    caption: String,
    download_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<String>,
    retry_count: i64,
}

impl From<MediaReference> for MediaBody {
    fn from(reference: MediaReference) -> Self {
        Self {
            id: reference.id,
            media_type: reference.media_type.as_str(),
            mimetype: reference.mimetype,
            caption: reference.caption,
            download_status: reference.download_status.as_str(),
            file_path: reference.file_path,
            retry_count: reference.retry_count,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_body(message: impl Into<String>) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: message.into(),
    })
}

/// `GET /chats/{chat_id}/messages?client_id=&after=&limit=`
async fn list_messages(
    State(state): State<Arc<ApiState>>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<MessageBody>>, (StatusCode, Json<ErrorBody>)> {
    let chat = state
        .chats
        .find(&query.client_id, &chat_id)
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, error_body(format!("chat {chat_id} not found"))))?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let messages = state
        .messages
        .list_for_chat_after(&chat.id, query.after, limit)
        .map_err(internal)?;

    Ok(Json(messages.into_iter().map(MessageBody::from).collect()))
}

/// `GET /messages/{message_id}/media`
async fn list_media(
    State(state): State<Arc<ApiState>>,
    Path(message_id): Path<String>,
) -> Result<Json<Vec<MediaBody>>, (StatusCode, Json<ErrorBody>)> {
    let references = state.media.list_for_message(&message_id).map_err(internal)?;
    Ok(Json(references.into_iter().map(MediaBody::from).collect()))
}

#[derive(Debug, Deserialize)]
struct ResolvedBody {
    file_path: String,
}

/// `POST /media/{id}/resolved`
///
/// External downloader callback. A failed reference is the expected
/// caller here, so it is reset through the one allowed backward
/// transition before completing. Transitions still run through the same
/// forward-only status machine as the internal resolver, so a reference
/// that already reached a terminal state answers 409.
async fn mark_resolved(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(body): Json<ResolvedBody>,
) -> Result<Json<MediaBody>, (StatusCode, Json<ErrorBody>)> {
    let Some(current) = state.media.get(&id).map_err(internal)? else {
        return Err((StatusCode::NOT_FOUND, error_body(format!("media {id} not found"))));
    };

    if current.download_status == DownloadStatus::Failed {
        state
            .media
            .set_status(&id, DownloadStatus::Pending, None)
            .map_err(internal)?;
    }

    match state
        .media
        .set_status(&id, DownloadStatus::Success, Some(&body.file_path))
    {
        Ok(reference) => Ok(Json(MediaBody::from(reference))),
        Err(crate::Error::Media(message)) => Err((StatusCode::CONFLICT, error_body(message))),
        Err(e) => Err(internal(e)),
    }
}

fn internal(e: crate::Error) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!(error = %e, "query surface failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_body("internal error"),
    )
}
