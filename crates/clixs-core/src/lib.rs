pub mod errors;
pub mod frames;
pub mod ids;
pub mod lookup;
pub mod models;
pub mod timestamp;

pub use errors::ChatError;
pub use frames::{CloseCode, InboundFrame, ServerFrame};
pub use ids::{ConversationId, ListingId, MessageId, SessionId, UserId};
pub use lookup::{AccountLookup, ListingLookup};
pub use models::{
    Account, Conversation, ConversationStatus, Identity, Listing, ListingStatus, Message,
    MAX_BODY_CHARS,
};
