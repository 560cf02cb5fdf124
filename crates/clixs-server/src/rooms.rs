//! Room membership and event fan-out.
//!
//! A room is the set of live sessions joined to one conversation. The registry only holds
//! handles; each session owns its own transport and outbound queue.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use clixs_core::{CloseCode, ConversationId, ServerFrame, SessionId, UserId};

/// Non-owning handle to a live session: its outbound queue and a way to close it.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub user_id: UserId,
    tx: mpsc::Sender<Arc<str>>,
    close_code: Arc<OnceLock<CloseCode>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create a handle with a bounded outbound queue of `capacity` frames.
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            session_id,
            user_id,
            tx,
            close_code: Arc::new(OnceLock::new()),
            cancel: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Queue a serialized frame without waiting.
    pub fn try_deliver(&self, payload: Arc<str>) -> Result<(), TrySendError<Arc<str>>> {
        self.tx.try_send(payload)
    }

    /// Ask the session to close with `code`. The first code requested wins.
    pub fn close(&self, code: CloseCode) {
        let _ = self.close_code.set(code);
        self.cancel.cancel();
    }

    /// Resolves once `close` has been called, yielding the close code.
    pub async fn closed(&self) -> CloseCode {
        self.cancel.cancelled().await;
        self.close_code().unwrap_or(CloseCode::Normal)
    }

    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_code.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Sessions removed because their queue was full or gone.
    pub evicted: usize,
}

/// Conversation-keyed membership with fan-out.
///
/// A session that has returned from `join` sees every broadcast issued after it. Delivery to one
/// member never waits on, or fails because of, another member.
pub trait RoomRegistry: Send + Sync {
    fn join(&self, conversation_id: &ConversationId, session: SessionHandle);

    /// Remove a session. Returns `false` if it was not a member.
    fn leave(&self, conversation_id: &ConversationId, session_id: &SessionId) -> bool;

    fn broadcast(&self, conversation_id: &ConversationId, frame: &ServerFrame) -> BroadcastReport;

    /// Drop the whole room and close every member with `code`. Returns how many were closed.
    fn close_room(&self, conversation_id: &ConversationId, code: CloseCode) -> usize;

    fn room_size(&self, conversation_id: &ConversationId) -> usize;

    fn room_count(&self) -> usize;

    fn session_count(&self) -> usize;
}

/// Single-process registry backed by a sharded map.
///
/// Broadcast holds the room's shard lock while queueing, so membership changes for that
/// conversation are ordered against it.
#[derive(Default)]
pub struct InProcessRooms {
    rooms: DashMap<ConversationId, HashMap<SessionId, SessionHandle>>,
}

impl InProcessRooms {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomRegistry for InProcessRooms {
    fn join(&self, conversation_id: &ConversationId, session: SessionHandle) {
        debug!(
            conversation_id = %conversation_id,
            session_id = %session.session_id,
            user_id = %session.user_id,
            "session joined room"
        );
        let _ = self
            .rooms
            .entry(conversation_id.clone())
            .or_default()
            .insert(session.session_id.clone(), session);
    }

    fn leave(&self, conversation_id: &ConversationId, session_id: &SessionId) -> bool {
        let (removed, empty) = {
            let Some(mut room) = self.rooms.get_mut(conversation_id) else {
                return false;
            };
            let removed = room.remove(session_id).is_some();
            (removed, room.is_empty())
        };
        if empty {
            let _ = self.rooms.remove_if(conversation_id, |_, room| room.is_empty());
        }
        if removed {
            debug!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                "session left room"
            );
        }
        removed
    }

    fn broadcast(&self, conversation_id: &ConversationId, frame: &ServerFrame) -> BroadcastReport {
        let payload: Arc<str> = match serde_json::to_string(frame) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(event_type = frame.event_type(), error = %e, "failed to serialize frame");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut slow = Vec::new();
        let empty = {
            let Some(mut room) = self.rooms.get_mut(conversation_id) else {
                return report;
            };
            room.retain(|session_id, handle| {
                match handle.try_deliver(Arc::clone(&payload)) {
                    Ok(()) => {
                        report.delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        slow.push(handle.clone());
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(
                            conversation_id = %conversation_id,
                            session_id = %session_id,
                            "dropping session with closed queue"
                        );
                        report.evicted += 1;
                        false
                    }
                }
            });
            room.is_empty()
        };
        if empty {
            let _ = self.rooms.remove_if(conversation_id, |_, room| room.is_empty());
        }

        for handle in slow {
            warn!(
                conversation_id = %conversation_id,
                session_id = %handle.session_id,
                user_id = %handle.user_id,
                "outbound queue full, evicting slow consumer"
            );
            handle.close(CloseCode::SlowConsumer);
            report.evicted += 1;
        }

        debug!(
            conversation_id = %conversation_id,
            event_type = frame.event_type(),
            delivered = report.delivered,
            evicted = report.evicted,
            "broadcast"
        );
        report
    }

    fn close_room(&self, conversation_id: &ConversationId, code: CloseCode) -> usize {
        let Some((_, room)) = self.rooms.remove(conversation_id) else {
            return 0;
        };
        for handle in room.values() {
            handle.close(code);
        }
        debug!(
            conversation_id = %conversation_id,
            sessions = room.len(),
            close_code = code.code(),
            "room closed"
        );
        room.len()
    }

    fn room_size(&self, conversation_id: &ConversationId) -> usize {
        self.rooms.get(conversation_id).map_or(0, |room| room.len())
    }

    fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn session_count(&self) -> usize {
        self.rooms.iter().map(|room| room.len()).sum()
    }
}
