//! Chat operations shared by the realtime endpoint and the REST surface.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use clixs_core::models::normalize_body;
use clixs_core::{
    ChatError, CloseCode, Conversation, ConversationId, Identity, ListingId, ListingLookup, Message,
    ServerFrame,
};
use clixs_store::{ConversationRepo, ConversationSummary, Database, MessageRepo};

use crate::gate::AuthorizationGate;
use crate::rooms::RoomRegistry;

/// Conversation lifecycle, persistence and fan-out behind one API.
///
/// Every method takes the caller's identity explicitly.
pub struct ChatService {
    conversations: ConversationRepo,
    messages: MessageRepo,
    listings: Arc<dyn ListingLookup>,
    rooms: Arc<dyn RoomRegistry>,
    gate: Arc<AuthorizationGate>,
    max_body_chars: usize,
}

impl ChatService {
    pub fn new(
        db: Database,
        listings: Arc<dyn ListingLookup>,
        rooms: Arc<dyn RoomRegistry>,
        max_body_chars: usize,
    ) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            listings,
            rooms,
            gate: Arc::new(AuthorizationGate::new(db)),
            max_body_chars,
        }
    }

    pub fn gate(&self) -> &Arc<AuthorizationGate> {
        &self.gate
    }

    pub fn rooms(&self) -> &Arc<dyn RoomRegistry> {
        &self.rooms
    }

    /// Open (or return the existing) conversation between the caller and a listing's owner.
    #[instrument(
        skip(self, identity),
        fields(user_id = %identity.user_id, listing_id = %listing_id)
    )]
    pub fn start_conversation(
        &self,
        identity: &Identity,
        listing_id: &ListingId,
    ) -> Result<(Conversation, bool), ChatError> {
        let listing = self
            .listings
            .listing(listing_id)?
            .ok_or_else(|| ChatError::NotFound(format!("listing {listing_id}")))?;

        if listing.owner_id == identity.user_id {
            return Err(ChatError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }

        if let Some(existing) = self
            .conversations
            .find_by_pair(listing_id, &identity.user_id)?
        {
            return Ok((existing, false));
        }

        if !listing.is_active() {
            return Err(ChatError::Validation("listing is not active".into()));
        }

        let (conversation, created) = self.conversations.get_or_create(
            &listing.id,
            &listing.title,
            &identity.user_id,
            &listing.owner_id,
        )?;
        if created {
            info!(conversation_id = %conversation.id, "conversation started");
        }
        Ok((conversation, created))
    }

    pub fn conversations_for(
        &self,
        identity: &Identity,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        Ok(self.conversations.list_for_user(&identity.user_id)?)
    }

    /// Full ordered history, for participants only.
    pub fn history(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        let _ = self.gate.check_join(identity, conversation_id)?;
        Ok(self.messages.list(conversation_id)?)
    }

    /// Persist a message and broadcast it to the room, sender included.
    ///
    /// Returns `Ok(None)` for an empty or whitespace-only body, which is dropped without
    /// persistence or broadcast.
    #[instrument(
        skip(self, identity, raw),
        fields(user_id = %identity.user_id, conversation_id = %conversation_id)
    )]
    pub fn post_message(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
        raw: &str,
    ) -> Result<Option<Message>, ChatError> {
        let Some(body) = normalize_body(raw, self.max_body_chars)? else {
            debug!("empty message dropped");
            return Ok(None);
        };

        let conversation = self.gate.check_post(identity, conversation_id)?;

        let listing_active = self
            .listings
            .listing(&conversation.listing_id)?
            .is_some_and(|listing| listing.is_active());
        if !listing_active {
            let _ = self.listing_deactivated(&conversation.listing_id)?;
            return Err(ChatError::ConversationClosed);
        }

        let message = self
            .messages
            .append(conversation_id, &identity.user_id, &body)?;
        let report = self
            .rooms
            .broadcast(conversation_id, &ServerFrame::from_message(&message));
        debug!(
            message_id = %message.id,
            delivered = report.delivered,
            "message accepted"
        );
        Ok(Some(message))
    }

    /// Mark the counterpart's messages as read by the caller.
    pub fn mark_read(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
    ) -> Result<usize, ChatError> {
        let _ = self.gate.check_join(identity, conversation_id)?;
        Ok(self.messages.mark_read(conversation_id, &identity.user_id)?)
    }

    /// Close a conversation on behalf of its listing owner and disconnect its room.
    ///
    /// Returns `false` if it was already closed.
    #[instrument(
        skip(self, identity),
        fields(user_id = %identity.user_id, conversation_id = %conversation_id)
    )]
    pub fn close_conversation(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
    ) -> Result<bool, ChatError> {
        let conversation = self.gate.check_join(identity, conversation_id)?;
        if conversation.owner_id != identity.user_id {
            return Err(ChatError::NotParticipant);
        }
        let closed = self.conversations.close(conversation_id)?;
        if closed {
            let sessions = self
                .rooms
                .close_room(conversation_id, CloseCode::ConversationClosed);
            info!(sessions, "conversation closed by owner");
        }
        Ok(closed)
    }

    /// Close every open conversation for a listing that is no longer available.
    #[instrument(skip(self), fields(listing_id = %listing_id))]
    pub fn listing_deactivated(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ConversationId>, ChatError> {
        let closed = self.conversations.close_for_listing(listing_id)?;
        for conversation_id in &closed {
            let sessions = self
                .rooms
                .close_room(conversation_id, CloseCode::ConversationClosed);
            if sessions > 0 {
                warn!(
                    conversation_id = %conversation_id,
                    sessions,
                    "listing no longer active, disconnecting room"
                );
            }
        }
        if !closed.is_empty() {
            info!(conversations = closed.len(), "conversations closed for listing");
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::{InProcessRooms, SessionHandle};
    use clixs_core::{Listing, ListingStatus, SessionId, UserId};
    use clixs_store::ListingRepo;

    struct Fixture {
        chat: ChatService,
        listings: Arc<ListingRepo>,
        rooms: Arc<InProcessRooms>,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let listings = Arc::new(ListingRepo::new(db.clone()));
        listings
            .upsert(&Listing {
                id: ListingId::from_raw("lst_sofa"),
                owner_id: UserId::from_raw("usr_owner"),
                title: "Sofa".into(),
                status: ListingStatus::Active,
            })
            .unwrap();
        let rooms = Arc::new(InProcessRooms::new());
        let chat = ChatService::new(db, listings.clone(), rooms.clone(), 20);
        Fixture {
            chat,
            listings,
            rooms,
        }
    }

    fn who(id: &str) -> Identity {
        Identity::new(UserId::from_raw(id))
    }

    fn sofa() -> ListingId {
        ListingId::from_raw("lst_sofa")
    }

    #[test]
    fn start_conversation_is_idempotent() {
        let f = fixture();
        let (first, created) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        assert!(created);
        assert_eq!(first.listing_title, "Sofa");
        assert_eq!(first.owner_id, UserId::from_raw("usr_owner"));

        let (again, created) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        assert!(!created);
        assert_eq!(first.id, again.id);
    }

    #[test]
    fn start_conversation_rejections() {
        let f = fixture();
        assert_eq!(
            f.chat
                .start_conversation(&who("usr_owner"), &sofa())
                .unwrap_err()
                .kind(),
            "validation_error"
        );
        assert_eq!(
            f.chat
                .start_conversation(&who("usr_buyer"), &ListingId::from_raw("lst_none"))
                .unwrap_err()
                .kind(),
            "not_found"
        );
    }

    #[test]
    fn inactive_listing_blocks_new_but_returns_existing() {
        let f = fixture();
        let (existing, _) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        f.listings.set_status(&sofa(), ListingStatus::Sold).unwrap();

        let (again, created) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        assert!(!created);
        assert_eq!(again.id, existing.id);

        let err = f
            .chat
            .start_conversation(&who("usr_late"), &sofa())
            .unwrap_err();
        assert_eq!(err, ChatError::Validation("listing is not active".into()));
    }

    #[test]
    fn post_broadcasts_to_room_including_sender() {
        let f = fixture();
        let (conv, _) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        let (a, mut rx_a) = SessionHandle::new(SessionId::new(), UserId::from_raw("usr_buyer"), 4);
        let (b, mut rx_b) = SessionHandle::new(SessionId::new(), UserId::from_raw("usr_owner"), 4);
        f.rooms.join(&conv.id, a);
        f.rooms.join(&conv.id, b);

        let msg = f
            .chat
            .post_message(&who("usr_buyer"), &conv.id, "  hi  ")
            .unwrap()
            .unwrap();
        assert_eq!(msg.body, "hi");

        let frame_a: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        let frame_b: serde_json::Value = serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
        assert_eq!(frame_a, frame_b);
        assert_eq!(frame_a["type"], "chat.message");
        assert_eq!(frame_a["id"], msg.id.get());
        assert_eq!(frame_a["sender_id"], "usr_buyer");
    }

    #[test]
    fn empty_message_is_dropped() {
        let f = fixture();
        let (conv, _) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        let (a, mut rx_a) = SessionHandle::new(SessionId::new(), UserId::from_raw("usr_buyer"), 4);
        f.rooms.join(&conv.id, a);

        assert!(f
            .chat
            .post_message(&who("usr_buyer"), &conv.id, "   ")
            .unwrap()
            .is_none());
        assert!(rx_a.try_recv().is_err());
        assert!(f.chat.history(&who("usr_buyer"), &conv.id).unwrap().is_empty());
    }

    #[test]
    fn oversize_message_is_a_validation_error() {
        let f = fixture();
        let (conv, _) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        let err = f
            .chat
            .post_message(&who("usr_buyer"), &conv.id, &"x".repeat(21))
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn outsider_cannot_post_or_read() {
        let f = fixture();
        let (conv, _) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        assert_eq!(
            f.chat
                .post_message(&who("usr_other"), &conv.id, "hi")
                .unwrap_err(),
            ChatError::NotParticipant
        );
        assert_eq!(
            f.chat.history(&who("usr_other"), &conv.id).unwrap_err(),
            ChatError::NotParticipant
        );
    }

    #[test]
    fn posting_after_listing_sold_closes_conversation() {
        let f = fixture();
        let (conv, _) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        let (a, _rx_a) = SessionHandle::new(SessionId::new(), UserId::from_raw("usr_buyer"), 4);
        f.rooms.join(&conv.id, a.clone());
        f.listings.set_status(&sofa(), ListingStatus::Rented).unwrap();

        let err = f
            .chat
            .post_message(&who("usr_buyer"), &conv.id, "still there?")
            .unwrap_err();
        assert_eq!(err, ChatError::ConversationClosed);
        assert_eq!(a.close_code(), Some(CloseCode::ConversationClosed));
        assert!(f.chat.history(&who("usr_buyer"), &conv.id).unwrap().is_empty());
    }

    #[test]
    fn listing_deactivated_closes_rooms() {
        let f = fixture();
        let (c1, _) = f.chat.start_conversation(&who("usr_b1"), &sofa()).unwrap();
        let (c2, _) = f.chat.start_conversation(&who("usr_b2"), &sofa()).unwrap();
        let (s1, _rx1) = SessionHandle::new(SessionId::new(), UserId::from_raw("usr_b1"), 4);
        f.rooms.join(&c1.id, s1.clone());

        let closed = f.chat.listing_deactivated(&sofa()).unwrap();
        assert_eq!(closed.len(), 2);
        assert!(closed.contains(&c1.id) && closed.contains(&c2.id));
        assert_eq!(s1.close_code(), Some(CloseCode::ConversationClosed));
        assert_eq!(f.rooms.room_count(), 0);

        assert!(f.chat.listing_deactivated(&sofa()).unwrap().is_empty());
    }

    #[test]
    fn only_owner_can_close() {
        let f = fixture();
        let (conv, _) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        assert_eq!(
            f.chat
                .close_conversation(&who("usr_buyer"), &conv.id)
                .unwrap_err(),
            ChatError::NotParticipant
        );
        assert!(f.chat.close_conversation(&who("usr_owner"), &conv.id).unwrap());
        assert!(!f.chat.close_conversation(&who("usr_owner"), &conv.id).unwrap());
        assert_eq!(
            f.chat
                .post_message(&who("usr_buyer"), &conv.id, "hello?")
                .unwrap_err(),
            ChatError::ConversationClosed
        );
    }

    #[test]
    fn mark_read_only_counts_counterpart_messages() {
        let f = fixture();
        let (conv, _) = f.chat.start_conversation(&who("usr_buyer"), &sofa()).unwrap();
        f.chat.post_message(&who("usr_buyer"), &conv.id, "one").unwrap();
        f.chat.post_message(&who("usr_owner"), &conv.id, "two").unwrap();
        f.chat.post_message(&who("usr_owner"), &conv.id, "three").unwrap();

        assert_eq!(f.chat.mark_read(&who("usr_buyer"), &conv.id).unwrap(), 2);
        assert_eq!(f.chat.mark_read(&who("usr_buyer"), &conv.id).unwrap(), 0);

        let summaries = f.chat.conversations_for(&who("usr_owner")).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].unread_count, 1);
    }
}
