use serde::{Deserialize, Serialize};

use crate::errors::ChatError;
use crate::ids::{ConversationId, SessionId, UserId};
use crate::models::Message;
use crate::timestamp;

/// Client → server: `{ "message": string }`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InboundFrame {
    pub message: String,
}

impl InboundFrame {
    /// Parse a text frame. Anything other than an object with a string `message` is a
    /// validation error; extra fields are ignored.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        serde_json::from_str(raw)
            .map_err(|e| ChatError::Validation(format!("malformed frame: {e}")))
    }
}

/// Server → client events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Sent once, after the session is registered with its room.
    #[serde(rename = "chat.joined")]
    Joined {
        conversation_id: ConversationId,
        session_id: SessionId,
        user_id: UserId,
    },

    #[serde(rename = "chat.message")]
    Message {
        id: i64,
        message: String,
        sender_id: UserId,
        created_at: String,
        is_read: bool,
    },

    #[serde(rename = "chat.error")]
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn from_message(message: &Message) -> Self {
        Self::Message {
            id: message.id.get(),
            message: message.body.clone(),
            sender_id: message.sender_id.clone(),
            created_at: timestamp::format(&message.created_at),
            is_read: message.is_read(),
        }
    }

    pub fn from_error(err: &ChatError) -> Self {
        Self::Error {
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "chat.joined",
            Self::Message { .. } => "chat.message",
            Self::Error { .. } => "chat.error",
        }
    }
}

/// WebSocket close codes used by the chat endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    Unauthenticated,
    Forbidden,
    MessageTooBig,
    SlowConsumer,
    ConversationClosed,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::MessageTooBig => 1009,
            Self::Unauthenticated => 4001,
            Self::Forbidden => 4004,
            Self::SlowConsumer => 4008,
            Self::ConversationClosed => 4010,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "bye",
            Self::GoingAway => "going away",
            Self::MessageTooBig => "message too big",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::SlowConsumer => "slow consumer",
            Self::ConversationClosed => "conversation closed",
        }
    }
}
