/// Failure taxonomy for the chat core.
///
/// Every failure terminates at the operation or connection boundary. `kind()` is the stable
/// string sent to clients as the `code` of a `chat.error` event and used in log fields.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    // Rejected before the connection is accepted
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    // Authorization
    #[error("not a participant of this conversation")]
    NotParticipant,
    #[error("conversation is closed")]
    ConversationClosed,

    // Per-message, connection stays open
    #[error("invalid message: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::NotParticipant => "forbidden",
            Self::ConversationClosed => "conversation_closed",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Transport(_) => "transport_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Failures caused by the caller's input rather than by the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Transport(_) | Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings() {
        assert_eq!(ChatError::Unauthenticated("expired".into()).kind(), "unauthenticated");
        assert_eq!(ChatError::NotParticipant.kind(), "forbidden");
        assert_eq!(ChatError::ConversationClosed.kind(), "conversation_closed");
        assert_eq!(ChatError::Validation("empty".into()).kind(), "validation_error");
        assert_eq!(ChatError::Transport("reset".into()).kind(), "transport_error");
        assert_eq!(ChatError::Internal("db".into()).kind(), "internal_error");
    }

    #[test]
    fn client_error_classification() {
        assert!(ChatError::Validation("x".into()).is_client_error());
        assert!(ChatError::NotFound("conv".into()).is_client_error());
        assert!(!ChatError::Transport("reset".into()).is_client_error());
        assert!(!ChatError::Internal("db".into()).is_client_error());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            ChatError::Validation("message too long".into()).to_string(),
            "invalid message: message too long"
        );
        assert_eq!(ChatError::ConversationClosed.to_string(), "conversation is closed");
    }
}
