use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};

use clixs_core::{timestamp, Conversation, ConversationId, ListingId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str = "c.id, c.listing_id, c.listing_title, c.initiator_id, c.owner_id, \
                       c.status, c.created_at, c.last_activity_at";

/// Most recent message of a conversation, for inbox listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagePreview {
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub last_message: Option<MessagePreview>,
    /// Messages from the counterpart that the viewing user has not read.
    pub unread_count: u64,
}

pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the conversation for `(listing, initiator)`, creating it if absent.
    ///
    /// The flag is `true` only for the call that inserted the row. Concurrent callers on the
    /// same pair all observe the same conversation id.
    #[instrument(
        skip(self, listing_title),
        fields(listing_id = %listing_id, initiator_id = %initiator)
    )]
    pub fn get_or_create(
        &self,
        listing_id: &ListingId,
        listing_title: &str,
        initiator: &UserId,
        owner: &UserId,
    ) -> Result<(Conversation, bool), StoreError> {
        if initiator == owner {
            return Err(StoreError::Invalid(
                "cannot start a conversation with yourself".into(),
            ));
        }

        self.db.with_tx(|conn| {
            let id = ConversationId::new();
            let now = timestamp::format(&timestamp::now());
            let inserted = conn.execute(
                "INSERT INTO conversations
                    (id, listing_id, listing_title, initiator_id, owner_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6)
                 ON CONFLICT (listing_id, initiator_id) DO NOTHING",
                rusqlite::params![
                    id.as_str(),
                    listing_id.as_str(),
                    listing_title,
                    initiator.as_str(),
                    owner.as_str(),
                    now
                ],
            )?;

            let conversation = find_by_pair_in(conn, listing_id, initiator)?.ok_or_else(|| {
                StoreError::NotFound(format!("conversation for {listing_id}/{initiator}"))
            })?;
            let created = inserted == 1;
            if created {
                debug!(conversation_id = %conversation.id, "conversation created");
            }
            Ok((conversation, created))
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    pub fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        self.db.with_conn(|conn| find_in(conn, id))
    }

    pub fn find_by_pair(
        &self,
        listing_id: &ListingId,
        initiator: &UserId,
    ) -> Result<Option<Conversation>, StoreError> {
        self.db
            .with_conn(|conn| find_by_pair_in(conn, listing_id, initiator))
    }

    /// Conversations where `user` is a participant, most recently active first.
    /// Conversations without messages sort last, newest first among themselves.
    #[instrument(skip(self), fields(user_id = %user))]
    pub fn list_for_user(&self, user: &UserId) -> Result<Vec<ConversationSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS}, m.sender_id, m.body, m.created_at,
                        (SELECT COUNT(*) FROM messages u
                          WHERE u.conversation_id = c.id
                            AND u.sender_id <> ?1
                            AND u.read_at IS NULL)
                 FROM conversations c
                 LEFT JOIN messages m ON m.id = (
                     SELECT id FROM messages
                      WHERE conversation_id = c.id
                      ORDER BY created_at DESC, id DESC
                      LIMIT 1)
                 WHERE c.initiator_id = ?1 OR c.owner_id = ?1
                 ORDER BY c.last_activity_at IS NULL, c.last_activity_at DESC, c.created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([user.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let conversation = row_to_conversation(row)?;
                let sender = row_helpers::get_opt::<String>(row, 8, "messages", "sender_id")?;
                let last_message = match sender {
                    Some(sender) => {
                        let created: String = row_helpers::get(row, 10, "messages", "created_at")?;
                        Some(MessagePreview {
                            sender_id: UserId::from_raw(sender),
                            body: row_helpers::get(row, 9, "messages", "body")?,
                            created_at: row_helpers::parse_ts(&created, "messages", "created_at")?,
                        })
                    }
                    None => None,
                };
                let unread: i64 = row_helpers::get(row, 11, "messages", "read_at")?;
                results.push(ConversationSummary {
                    conversation,
                    last_message,
                    unread_count: u64::try_from(unread).unwrap_or(0),
                });
            }
            Ok(results)
        })
    }

    /// Close one conversation. Returns `false` if it was already closed.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn close(&self, id: &ConversationId) -> Result<bool, StoreError> {
        self.db.with_tx(|conn| {
            if find_in(conn, id)?.is_none() {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            let changed = conn.execute(
                "UPDATE conversations SET status = 'closed' WHERE id = ?1 AND status = 'open'",
                [id.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Close every open conversation anchored to `listing_id`, returning the ids closed.
    #[instrument(skip(self), fields(listing_id = %listing_id))]
    pub fn close_for_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ConversationId>, StoreError> {
        self.db.with_tx(|conn| {
            let ids: Vec<String> = conn
                .prepare(
                    "SELECT id FROM conversations
                     WHERE listing_id = ?1 AND status = 'open'
                     ORDER BY created_at",
                )?
                .query_map([listing_id.as_str()], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            conn.execute(
                "UPDATE conversations SET status = 'closed'
                 WHERE listing_id = ?1 AND status = 'open'",
                [listing_id.as_str()],
            )?;
            Ok(ids.into_iter().map(ConversationId::from_raw).collect())
        })
    }
}

pub(crate) fn find_in(
    conn: &Connection,
    id: &ConversationId,
) -> Result<Option<Conversation>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM conversations c WHERE c.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_conversation(row).map(Some),
        None => Ok(None),
    }
}

fn find_by_pair_in(
    conn: &Connection,
    listing_id: &ListingId,
    initiator: &UserId,
) -> Result<Option<Conversation>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM conversations c WHERE c.listing_id = ?1 AND c.initiator_id = ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([listing_id.as_str(), initiator.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_conversation(row).map(Some),
        None => Ok(None),
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<Conversation, StoreError> {
    let status: String = row_helpers::get(row, 5, "conversations", "status")?;
    let created_at: String = row_helpers::get(row, 6, "conversations", "created_at")?;
    let last_activity: Option<String> =
        row_helpers::get_opt(row, 7, "conversations", "last_activity_at")?;

    Ok(Conversation {
        id: ConversationId::from_raw(row_helpers::get::<String>(row, 0, "conversations", "id")?),
        listing_id: ListingId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "conversations",
            "listing_id",
        )?),
        listing_title: row_helpers::get(row, 2, "conversations", "listing_title")?,
        initiator_id: UserId::from_raw(row_helpers::get::<String>(
            row,
            3,
            "conversations",
            "initiator_id",
        )?),
        owner_id: UserId::from_raw(row_helpers::get::<String>(
            row,
            4,
            "conversations",
            "owner_id",
        )?),
        status: row_helpers::parse_enum(&status, "conversations", "status")?,
        created_at: row_helpers::parse_ts(&created_at, "conversations", "created_at")?,
        last_activity_at: row_helpers::parse_ts_opt(
            last_activity,
            "conversations",
            "last_activity_at",
        )?,
    })
}
