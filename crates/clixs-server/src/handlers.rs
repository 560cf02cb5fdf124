//! HTTP handlers: the WebSocket handshake and the REST query surface.

use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use clixs_core::{
    timestamp, ChatError, Conversation, ConversationId, Identity, ListingId, Message, UserId,
};
use clixs_store::ConversationSummary;

use crate::auth::{bearer_token, extract_token};
use crate::error::ApiError;
use crate::server::AppState;
use crate::session::{self, ChatSession};

/// Caller identity from `Authorization: Bearer`.
pub struct Authenticated(pub Identity);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ChatError::Unauthenticated("missing bearer token".into()))?;
        let identity = state.verifier.verify(&token).map_err(ChatError::from)?;
        Ok(Self(identity))
    }
}

#[derive(Debug, Serialize)]
pub struct MessagePreviewView {
    pub sender_id: UserId,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub id: ConversationId,
    pub listing_id: ListingId,
    pub listing_title: String,
    pub status: String,
    pub counterpart_id: Option<UserId>,
    pub created_at: String,
    pub last_activity_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreviewView>,
    pub unread_count: u64,
}

impl ConversationView {
    fn new(conversation: &Conversation, viewer: &UserId) -> Self {
        Self {
            id: conversation.id.clone(),
            listing_id: conversation.listing_id.clone(),
            listing_title: conversation.listing_title.clone(),
            status: conversation.status.to_string(),
            counterpart_id: conversation.counterpart(viewer).cloned(),
            created_at: timestamp::format(&conversation.created_at),
            last_activity_at: conversation.last_activity_at.as_ref().map(timestamp::format),
            last_message: None,
            unread_count: 0,
        }
    }

    fn from_summary(summary: &ConversationSummary, viewer: &UserId) -> Self {
        Self {
            last_message: summary.last_message.as_ref().map(|m| MessagePreviewView {
                sender_id: m.sender_id.clone(),
                message: m.body.clone(),
                created_at: timestamp::format(&m.created_at),
            }),
            unread_count: summary.unread_count,
            ..Self::new(&summary.conversation, viewer)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub sender_id: UserId,
    pub message: String,
    pub created_at: String,
    pub is_read: bool,
    pub is_me: bool,
}

impl MessageView {
    fn new(message: &Message, viewer: &UserId) -> Self {
        Self {
            id: message.id.get(),
            sender_id: message.sender_id.clone(),
            message: message.body.clone(),
            created_at: timestamp::format(&message.created_at),
            is_read: message.is_read(),
            is_me: &message.sender_id == viewer,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartConversation {
    pub listing_id: ListingId,
}

/// GET /api/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let summaries = state.chat.conversations_for(&identity)?;
    Ok(Json(
        summaries
            .iter()
            .map(|s| ConversationView::from_summary(s, &identity.user_id))
            .collect(),
    ))
}

/// POST /api/conversations
pub async fn start_conversation(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    body: Result<Json<StartConversation>, JsonRejection>,
) -> Result<(StatusCode, Json<ConversationView>), ApiError> {
    let Json(body) = body.map_err(|e| ChatError::Validation(e.body_text()))?;
    let (conversation, created) = state.chat.start_conversation(&identity, &body.listing_id)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ConversationView::new(&conversation, &identity.user_id))))
}

/// GET /api/conversations/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = state.chat.history(&identity, &conversation_id)?;
    Ok(Json(
        messages
            .iter()
            .map(|m| MessageView::new(m, &identity.user_id))
            .collect(),
    ))
}

/// POST /api/conversations/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let marked = state.chat.mark_read(&identity, &conversation_id)?;
    Ok(Json(json!({ "marked": marked })))
}

/// POST /api/conversations/{id}/close
pub async fn close_conversation(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let closed = state.chat.close_conversation(&identity, &conversation_id)?;
    Ok(Json(json!({ "closed": closed })))
}

/// GET /ws/chat/{id}/
///
/// Credentials and membership are checked before upgrading; a refusal is a plain HTTP response.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = extract_token(&query, &headers);
    let identity = match session::authorize(
        state.verifier.as_ref(),
        state.chat.gate(),
        token.as_deref(),
        &conversation_id,
    ) {
        Ok(identity) => identity,
        Err(rejection) => {
            info!(
                conversation_id = %conversation_id,
                kind = rejection.error.kind(),
                "chat handshake rejected"
            );
            return rejection.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            debug!(error = %e, "not a websocket upgrade");
            return e.into_response();
        }
    };

    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let chat_session = ChatSession::new(
        identity,
        conversation_id,
        state.chat.clone(),
        &state.config,
        state.shutdown.token(),
    );
    let sessions = state.sessions.clone();
    ws.max_message_size(state.config.transport_limit())
        .on_upgrade(move |socket| sessions.track_future(chat_session.run(socket)))
}
