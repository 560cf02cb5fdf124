use clixs_core::ChatError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conversation {0} is closed")]
    ConversationClosed(String),

    #[error("{user} is not a participant of conversation {conversation}")]
    NotParticipant { conversation: String, user: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ChatError::NotFound(what),
            StoreError::ConversationClosed(_) => ChatError::ConversationClosed,
            StoreError::NotParticipant { .. } => ChatError::NotParticipant,
            StoreError::Invalid(detail) => ChatError::Validation(detail),
            other => ChatError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_rejections_map_to_chat_errors() {
        assert_eq!(
            ChatError::from(StoreError::ConversationClosed("conv_1".into())),
            ChatError::ConversationClosed
        );
        assert_eq!(
            ChatError::from(StoreError::NotParticipant {
                conversation: "conv_1".into(),
                user: "u".into()
            }),
            ChatError::NotParticipant
        );
        assert_eq!(
            ChatError::from(StoreError::NotFound("conversation conv_1".into())).kind(),
            "not_found"
        );
    }

    #[test]
    fn database_failures_are_internal() {
        let err = ChatError::from(StoreError::Database("disk I/O error".into()));
        assert_eq!(err.kind(), "internal_error");
    }
}
