use tracing::{debug, instrument};

use clixs_core::{timestamp, ConversationId, Message, MessageId, UserId};

use crate::conversations::find_in;
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a message and advance the conversation's activity time in one transaction.
    ///
    /// The conversation must exist, be open, and have `sender` as a participant. The
    /// returned message carries the assigned id and `created_at`, which is never earlier
    /// than the previous message in the same conversation.
    #[instrument(skip(self, body), fields(conversation_id = %conversation_id, sender_id = %sender))]
    pub fn append(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        body: &str,
    ) -> Result<Message, StoreError> {
        if body.trim().is_empty() {
            return Err(StoreError::Invalid("message body is empty".into()));
        }

        self.db.with_tx(|conn| {
            let conversation = find_in(conn, conversation_id)?
                .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
            if !conversation.is_participant(sender) {
                return Err(StoreError::NotParticipant {
                    conversation: conversation_id.to_string(),
                    user: sender.to_string(),
                });
            }
            if !conversation.is_open() {
                return Err(StoreError::ConversationClosed(conversation_id.to_string()));
            }

            let now = timestamp::now();
            let created_at = match conversation.last_activity_at {
                Some(last) if last > now => last,
                _ => now,
            };
            let created_raw = timestamp::format(&created_at);

            conn.execute(
                "INSERT INTO messages (conversation_id, sender_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![conversation_id.as_str(), sender.as_str(), body, created_raw],
            )?;
            let id = MessageId(conn.last_insert_rowid());

            conn.execute(
                "UPDATE conversations SET last_activity_at = ?1 WHERE id = ?2",
                rusqlite::params![created_raw, conversation_id.as_str()],
            )?;

            debug!(message_id = %id, "message persisted");

            Ok(Message {
                id,
                conversation_id: conversation_id.clone(),
                sender_id: sender.clone(),
                body: body.to_string(),
                created_at,
                read_at: None,
            })
        })
    }

    /// Full history of a conversation, oldest first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            if find_in(conn, conversation_id)?.is_none() {
                return Err(StoreError::NotFound(format!("conversation {conversation_id}")));
            }
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, body, created_at, read_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([conversation_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    pub fn get(&self, id: MessageId) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, body, created_at, read_at
                 FROM messages WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.get()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// Mark every unread message from the counterpart as read by `reader`.
    ///
    /// `read_at` is set once and never precedes the message's `created_at`. Returns the number
    /// of messages that changed.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, reader_id = %reader))]
    pub fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader: &UserId,
    ) -> Result<usize, StoreError> {
        self.db.with_tx(|conn| {
            let conversation = find_in(conn, conversation_id)?
                .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
            if !conversation.is_participant(reader) {
                return Err(StoreError::NotParticipant {
                    conversation: conversation_id.to_string(),
                    user: reader.to_string(),
                });
            }

            let now = timestamp::format(&timestamp::now());
            let marked = conn.execute(
                "UPDATE messages SET read_at = MAX(created_at, ?1)
                 WHERE conversation_id = ?2 AND sender_id <> ?3 AND read_at IS NULL",
                rusqlite::params![now, conversation_id.as_str(), reader.as_str()],
            )?;
            Ok(marked)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let created_at: String = row_helpers::get(row, 4, "messages", "created_at")?;
    let read_at: Option<String> = row_helpers::get_opt(row, 5, "messages", "read_at")?;

    Ok(Message {
        id: MessageId(row_helpers::get(row, 0, "messages", "id")?),
        conversation_id: ConversationId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "messages",
            "conversation_id",
        )?),
        sender_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "messages", "sender_id")?),
        body: row_helpers::get(row, 3, "messages", "body")?,
        created_at: row_helpers::parse_ts(&created_at, "messages", "created_at")?,
        read_at: row_helpers::parse_ts_opt(read_at, "messages", "read_at")?,
    })
}
