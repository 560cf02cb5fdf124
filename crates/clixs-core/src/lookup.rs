//! Read-only views onto the catalog and account services.
//!
//! Both are synchronous queries with no side effects. Production deployments back them with
//! whatever owns listings and users; `clixs-store` ships SQLite mirrors for standalone use.

use crate::errors::ChatError;
use crate::ids::{ListingId, UserId};
use crate::models::{Account, Listing};

pub trait ListingLookup: Send + Sync {
    /// `Ok(None)` when the catalog has no such listing.
    fn listing(&self, id: &ListingId) -> Result<Option<Listing>, ChatError>;
}

pub trait AccountLookup: Send + Sync {
    /// `Ok(None)` when the account does not exist.
    fn account(&self, id: &UserId) -> Result<Option<Account>, ChatError>;
}
