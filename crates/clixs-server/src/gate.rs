//! Participation checks for joins and posts.

use clixs_core::{ChatError, Conversation, ConversationId, Identity};
use clixs_store::{ConversationRepo, Database};

/// Decides whether an identity may join or post to a conversation.
///
/// Every check reads the conversation fresh; nothing is cached between calls.
pub struct AuthorizationGate {
    conversations: ConversationRepo,
}

impl AuthorizationGate {
    pub fn new(db: Database) -> Self {
        Self {
            conversations: ConversationRepo::new(db),
        }
    }

    /// `true` when `identity` is one of the two participants. Unknown conversations are `false`.
    pub fn can_join(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
    ) -> Result<bool, ChatError> {
        Ok(self.joinable(identity, conversation_id)?.is_some())
    }

    /// Participant of an open conversation.
    pub fn can_post(identity: &Identity, conversation: &Conversation) -> bool {
        conversation.is_participant(&identity.user_id) && conversation.is_open()
    }

    /// Load the conversation if `identity` may join it.
    ///
    /// A missing conversation is reported as `NotParticipant` so callers cannot probe for ids.
    pub fn check_join(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, ChatError> {
        self.joinable(identity, conversation_id)?
            .ok_or(ChatError::NotParticipant)
    }

    /// Re-read the conversation and require an open one with `identity` as participant.
    pub fn check_post(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, ChatError> {
        let conversation = self.check_join(identity, conversation_id)?;
        if !Self::can_post(identity, &conversation) {
            return Err(ChatError::ConversationClosed);
        }
        Ok(conversation)
    }

    fn joinable(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, ChatError> {
        let conversation = self.conversations.find(conversation_id)?;
        Ok(conversation.filter(|c| c.is_participant(&identity.user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clixs_core::{ListingId, UserId};

    fn setup() -> (AuthorizationGate, ConversationRepo, Conversation) {
        let db = Database::in_memory().unwrap();
        let repo = ConversationRepo::new(db.clone());
        let (conv, _) = repo
            .get_or_create(
                &ListingId::from_raw("lst_1"),
                "Sofa",
                &UserId::from_raw("usr_buyer"),
                &UserId::from_raw("usr_owner"),
            )
            .unwrap();
        (AuthorizationGate::new(db), repo, conv)
    }

    fn who(id: &str) -> Identity {
        Identity::new(UserId::from_raw(id))
    }

    #[test]
    fn participants_can_join() {
        let (gate, _, conv) = setup();
        assert!(gate.can_join(&who("usr_buyer"), &conv.id).unwrap());
        assert!(gate.can_join(&who("usr_owner"), &conv.id).unwrap());
        assert!(!gate.can_join(&who("usr_other"), &conv.id).unwrap());
    }

    #[test]
    fn unknown_conversation_cannot_be_joined() {
        let (gate, _, _) = setup();
        let missing = ConversationId::from_raw("conv_missing");
        assert!(!gate.can_join(&who("usr_buyer"), &missing).unwrap());
        assert_eq!(
            gate.check_join(&who("usr_buyer"), &missing).unwrap_err(),
            ChatError::NotParticipant
        );
    }

    #[test]
    fn outsider_rejected_even_when_closed() {
        let (gate, repo, conv) = setup();
        repo.close(&conv.id).unwrap();
        assert_eq!(
            gate.check_join(&who("usr_other"), &conv.id).unwrap_err(),
            ChatError::NotParticipant
        );
        assert!(gate.check_join(&who("usr_buyer"), &conv.id).is_ok());
    }

    #[test]
    fn posting_requires_open_conversation() {
        let (gate, repo, conv) = setup();
        assert!(AuthorizationGate::can_post(&who("usr_buyer"), &conv));
        assert!(!AuthorizationGate::can_post(&who("usr_other"), &conv));
        assert!(gate.check_post(&who("usr_owner"), &conv.id).is_ok());

        repo.close(&conv.id).unwrap();
        assert_eq!(
            gate.check_post(&who("usr_owner"), &conv.id).unwrap_err(),
            ChatError::ConversationClosed
        );
        let closed = repo.get(&conv.id).unwrap();
        assert!(!AuthorizationGate::can_post(&who("usr_buyer"), &closed));
    }

    #[test]
    fn checks_agree_with_predicates() {
        let (gate, repo, conv) = setup();
        for user in ["usr_buyer", "usr_owner", "usr_other"] {
            let identity = who(user);
            assert_eq!(
                gate.can_join(&identity, &conv.id).unwrap(),
                gate.check_join(&identity, &conv.id).is_ok(),
                "{user}"
            );
            assert_eq!(
                AuthorizationGate::can_post(&identity, &conv),
                gate.check_post(&identity, &conv.id).is_ok(),
                "{user}"
            );
        }

        repo.close(&conv.id).unwrap();
        assert!(gate.can_join(&who("usr_buyer"), &conv.id).unwrap());
        assert_eq!(
            gate.check_post(&who("usr_buyer"), &conv.id).unwrap_err(),
            ChatError::ConversationClosed
        );
    }
}
