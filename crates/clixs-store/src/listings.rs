use tracing::instrument;

use clixs_core::{timestamp, ChatError, Listing, ListingId, ListingLookup, ListingStatus, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Local mirror of catalog listings.
pub struct ListingRepo {
    db: Database,
}

impl ListingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, listing), fields(listing_id = %listing.id))]
    pub fn upsert(&self, listing: &Listing) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO listings (id, owner_id, title, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    title = excluded.title,
                    status = excluded.status,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    listing.id.as_str(),
                    listing.owner_id.as_str(),
                    listing.title,
                    listing.status.to_string(),
                    timestamp::format(&timestamp::now()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, id: &ListingId) -> Result<Option<Listing>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, owner_id, title, status FROM listings WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => {
                    let status: String = row_helpers::get(row, 3, "listings", "status")?;
                    Ok(Some(Listing {
                        id: ListingId::from_raw(row_helpers::get::<String>(
                            row, 0, "listings", "id",
                        )?),
                        owner_id: UserId::from_raw(row_helpers::get::<String>(
                            row, 1, "listings", "owner_id",
                        )?),
                        title: row_helpers::get(row, 2, "listings", "title")?,
                        status: row_helpers::parse_enum(&status, "listings", "status")?,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(listing_id = %id, status = %status))]
    pub fn set_status(&self, id: &ListingId, status: ListingStatus) -> Result<Listing, StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE listings SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![
                    status.to_string(),
                    timestamp::format(&timestamp::now()),
                    id.as_str()
                ],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("listing {id}")));
        }
        self.get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("listing {id}")))
    }
}

impl ListingLookup for ListingRepo {
    fn listing(&self, id: &ListingId) -> Result<Option<Listing>, ChatError> {
        Ok(self.get(id)?)
    }
}
