pub mod accounts;
pub mod conversations;
pub mod database;
pub mod error;
pub mod listings;
pub mod messages;
pub mod row_helpers;
pub mod schema;

pub use accounts::AccountRepo;
pub use conversations::{ConversationRepo, ConversationSummary, MessagePreview};
pub use database::Database;
pub use error::StoreError;
pub use listings::ListingRepo;
pub use messages::MessageRepo;
