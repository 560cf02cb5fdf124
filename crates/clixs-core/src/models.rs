use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ChatError;
use crate::ids::{ConversationId, ListingId, MessageId, UserId};

/// Upper bound on a message body, counted in characters.
pub const MAX_BODY_CHARS: usize = 2000;

/// The caller of an operation, resolved from a verified credential.
///
/// Passed explicitly through every call; nothing reads identity from ambient state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
}

impl Identity {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Closed,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

/// A two-party chat anchored to one listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub listing_id: ListingId,
    /// Title of the listing when the conversation started.
    pub listing_title: String,
    /// Participant A, the buyer who opened the conversation.
    pub initiator_id: UserId,
    /// Participant B, snapshotted from the listing owner at creation.
    pub owner_id: UserId,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    /// `None` until the first message is accepted.
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: &UserId) -> bool {
        &self.initiator_id == user_id || &self.owner_id == user_id
    }

    pub fn is_open(&self) -> bool {
        self.status == ConversationStatus::Open
    }

    /// The other participant, if `user_id` is one of the two.
    pub fn counterpart(&self, user_id: &UserId) -> Option<&UserId> {
        if &self.initiator_id == user_id {
            Some(&self.owner_id)
        } else if &self.owner_id == user_id {
            Some(&self.initiator_id)
        } else {
            None
        }
    }
}

/// An immutable text event within a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Trim a raw body and check its length.
///
/// Returns `Ok(None)` for empty or whitespace-only input: such messages are dropped without an
/// error event and without persistence.
pub fn normalize_body(raw: &str, max_chars: usize) -> Result<Option<String>, ChatError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(ChatError::Validation(format!(
            "message is {len} characters, limit is {max_chars}"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Sold,
    Rented,
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Sold => write!(f, "sold"),
            Self::Rented => write!(f, "rented"),
        }
    }
}

impl std::str::FromStr for ListingStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "sold" => Ok(Self::Sold),
            "rented" => Ok(Self::Rented),
            other => Err(format!("unknown listing status: {other}")),
        }
    }
}

/// Catalog view of a listing, as far as chat needs it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub owner_id: UserId,
    pub title: String,
    pub status: ListingStatus,
}

impl Listing {
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }
}

/// Account view of a user, as far as chat needs it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation {
            id: ConversationId::new(),
            listing_id: ListingId::from_raw("lst_1"),
            listing_title: "Bike".into(),
            initiator_id: UserId::from_raw("buyer"),
            owner_id: UserId::from_raw("seller"),
            status: ConversationStatus::Open,
            created_at: crate::timestamp::now(),
            last_activity_at: None,
        }
    }

    #[test]
    fn participants() {
        let c = conversation();
        assert!(c.is_participant(&UserId::from_raw("buyer")));
        assert!(c.is_participant(&UserId::from_raw("seller")));
        assert!(!c.is_participant(&UserId::from_raw("stranger")));
    }

    #[test]
    fn counterpart_of_each_side() {
        let c = conversation();
        assert_eq!(c.counterpart(&UserId::from_raw("buyer")).unwrap().as_str(), "seller");
        assert_eq!(c.counterpart(&UserId::from_raw("seller")).unwrap().as_str(), "buyer");
        assert!(c.counterpart(&UserId::from_raw("stranger")).is_none());
    }

    #[test]
    fn status_roundtrip() {
        for status in [ConversationStatus::Open, ConversationStatus::Closed] {
            let parsed: ConversationStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("archived".parse::<ConversationStatus>().is_err());
    }

    #[test]
    fn listing_status_parse() {
        assert_eq!("sold".parse::<ListingStatus>().unwrap(), ListingStatus::Sold);
        assert!("ACTIVE".parse::<ListingStatus>().is_err());
    }

    #[test]
    fn normalize_drops_blank_bodies() {
        assert_eq!(normalize_body("", MAX_BODY_CHARS).unwrap(), None);
        assert_eq!(normalize_body("   \n\t", MAX_BODY_CHARS).unwrap(), None);
    }

    #[test]
    fn normalize_trims() {
        assert_eq!(normalize_body("  hi  ", MAX_BODY_CHARS).unwrap().as_deref(), Some("hi"));
    }

    #[test]
    fn normalize_counts_characters_not_bytes() {
        let body = "é".repeat(10);
        assert!(normalize_body(&body, 10).unwrap().is_some());
        let err = normalize_body(&"é".repeat(11), 10).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
