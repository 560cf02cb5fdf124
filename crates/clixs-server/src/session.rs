//! One live chat connection.
//!
//! Credentials and membership are checked before the upgrade (see [`authorize`]). Once upgraded,
//! a session joins its room, acknowledges with `chat.joined`, then runs a single loop that reads
//! inbound frames, drains the outbound queue, pings, and watches for forced closure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use axum::http::StatusCode;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use clixs_core::{
    ChatError, CloseCode, ConversationId, Identity, InboundFrame, ServerFrame, SessionId,
};

use crate::auth::CredentialVerifier;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::gate::AuthorizationGate;
use crate::rooms::SessionHandle;

/// Lifecycle of a connection. Every path ends in `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Joined,
    Active,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Authenticated, Joined)
                | (Joined, Active)
                | (Connecting | Authenticated | Joined | Active, Closed)
        )
    }
}

/// Why a handshake was refused. Answered as a plain HTTP response; nothing is upgraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    /// The close code a client should treat this as. `None` for server faults.
    pub close_code: Option<CloseCode>,
    pub error: ChatError,
}

impl Rejection {
    pub fn from_error(error: ChatError) -> Self {
        let (status, close_code) = match &error {
            ChatError::Unauthenticated(_) => {
                (StatusCode::UNAUTHORIZED, Some(CloseCode::Unauthenticated))
            }
            ChatError::NotParticipant | ChatError::NotFound(_) => {
                (StatusCode::FORBIDDEN, Some(CloseCode::Forbidden))
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        Self {
            status,
            close_code,
            error,
        }
    }
}

/// Verify the token and check membership. CONNECTING → AUTHENTICATED, pre-upgrade.
pub fn authorize(
    verifier: &dyn CredentialVerifier,
    gate: &AuthorizationGate,
    token: Option<&str>,
    conversation_id: &ConversationId,
) -> Result<Identity, Rejection> {
    let token = token.unwrap_or_default();
    let identity = verifier
        .verify(token)
        .map_err(|e| Rejection::from_error(e.into()))?;
    match gate.can_join(&identity, conversation_id) {
        Ok(true) => Ok(identity),
        Ok(false) => Err(Rejection::from_error(ChatError::NotParticipant)),
        Err(e) => Err(Rejection::from_error(e)),
    }
}

enum Inbound {
    Ignore,
    Reply(ServerFrame),
    /// Answer, then close with the given code.
    Refuse(ServerFrame, CloseCode),
    PeerClosed,
}

type Sink = SplitSink<WebSocket, WsMessage>;

/// Upper bound on each teardown step against a peer that stopped reading.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

pub struct ChatSession {
    identity: Identity,
    conversation_id: ConversationId,
    handle: SessionHandle,
    outbound: mpsc::Receiver<Arc<str>>,
    chat: Arc<ChatService>,
    shutdown: CancellationToken,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    max_frame_bytes: usize,
    state: SessionState,
}

impl ChatSession {
    pub fn new(
        identity: Identity,
        conversation_id: ConversationId,
        chat: Arc<ChatService>,
        config: &ServerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (handle, outbound) = SessionHandle::new(
            SessionId::new(),
            identity.user_id.clone(),
            config.max_send_queue,
        );
        Self {
            identity,
            conversation_id,
            handle,
            outbound,
            chat,
            shutdown,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            max_frame_bytes: config.max_message_size,
            state: SessionState::Authenticated,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.handle.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "unexpected session transition");
        }
        self.state = next;
    }

    /// Drive the connection until it closes. Always leaves the room before returning.
    #[instrument(skip_all, fields(
        session_id = %self.handle.session_id,
        conversation_id = %self.conversation_id,
        user_id = %self.identity.user_id,
    ))]
    pub async fn run(mut self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let rooms = Arc::clone(self.chat.rooms());

        rooms.join(&self.conversation_id, self.handle.clone());
        self.transition(SessionState::Joined);
        info!("chat session opened");

        let joined = ServerFrame::Joined {
            conversation_id: self.conversation_id.clone(),
            session_id: self.handle.session_id.clone(),
            user_id: self.identity.user_id.clone(),
        };
        let close = match self.write_frame(&mut sink, &joined).await {
            Ok(()) => {
                self.transition(SessionState::Active);
                self.receive_loop(&mut sink, &mut stream).await
            }
            Err(close) => close,
        };

        let _ = rooms.leave(&self.conversation_id, &self.handle.session_id);
        self.transition(SessionState::Closed);

        let grace = self.heartbeat_timeout.min(CLOSE_GRACE);
        if let Some(code) = close {
            let outbound = &mut self.outbound;
            let farewell = async {
                while let Ok(payload) = outbound.try_recv() {
                    sink.send(WsMessage::Text(payload.to_string().into())).await?;
                }
                let frame = CloseFrame {
                    code: code.code(),
                    reason: code.reason().into(),
                };
                sink.send(WsMessage::Close(Some(frame))).await?;
                Ok::<_, axum::Error>(())
            };
            match tokio::time::timeout(grace, farewell).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
                Err(_) => debug!("peer did not accept the close frame in time"),
            }
        }
        let _ = tokio::time::timeout(grace, sink.close()).await;

        info!(close_code = close.map(CloseCode::code), "chat session closed");
    }

    /// Returns the close code to send, or `None` when the peer closed or the transport failed.
    async fn receive_loop(
        &mut self,
        sink: &mut Sink,
        stream: &mut futures::stream::SplitStream<WebSocket>,
    ) -> Option<CloseCode> {
        let handle = self.handle.clone();
        let shutdown = self.shutdown.clone();
        let timeout = self.heartbeat_timeout;

        let mut ping = tokio::time::interval(self.heartbeat_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = ping.tick().await;
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;

                code = handle.closed() => return Some(code),

                () = shutdown.cancelled() => return Some(CloseCode::GoingAway),

                Some(payload) = self.outbound.recv() => {
                    let msg = WsMessage::Text(payload.to_string().into());
                    if let Err(close) = self.write(sink, msg).await {
                        return close;
                    }
                }

                inbound = stream.next() => {
                    let msg = match inbound {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            debug!(error = %e, "read failed");
                            return None;
                        }
                        None => return None,
                    };
                    last_seen = Instant::now();
                    match self.on_inbound(msg) {
                        Inbound::Ignore => {}
                        Inbound::Reply(frame) => {
                            if let Err(close) = self.write_frame(sink, &frame).await {
                                return close;
                            }
                        }
                        Inbound::Refuse(frame, code) => {
                            return match self.write_frame(sink, &frame).await {
                                Ok(()) => Some(code),
                                Err(close) => close,
                            };
                        }
                        Inbound::PeerClosed => return None,
                    }
                }

                _ = ping.tick() => {
                    if last_seen.elapsed() > timeout {
                        info!(timeout_secs = timeout.as_secs(), "heartbeat timed out");
                        return Some(CloseCode::GoingAway);
                    }
                    if let Err(close) = self.write(sink, WsMessage::Ping(Vec::new().into())).await {
                        return close;
                    }
                }
            }
        }
    }

    /// Write one message, bounded by the heartbeat timeout. A forced close or shutdown interrupts
    /// it. `Err` carries the close code to send, if any.
    async fn write(&self, sink: &mut Sink, msg: WsMessage) -> Result<(), Option<CloseCode>> {
        tokio::select! {
            biased;

            code = self.handle.closed() => Err(Some(code)),

            () = self.shutdown.cancelled() => Err(Some(CloseCode::GoingAway)),

            sent = tokio::time::timeout(self.heartbeat_timeout, sink.send(msg)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    let err = ChatError::Transport(e.to_string());
                    debug!(kind = err.kind(), error = %err, "write failed");
                    Err(None)
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.heartbeat_timeout.as_secs(),
                        "peer stopped reading"
                    );
                    self.handle.close(CloseCode::SlowConsumer);
                    Err(self.handle.close_code())
                }
            },
        }
    }

    async fn write_frame(
        &self,
        sink: &mut Sink,
        frame: &ServerFrame,
    ) -> Result<(), Option<CloseCode>> {
        let json = serde_json::to_string(frame).map_err(|e| {
            error!(event_type = frame.event_type(), error = %e, "failed to serialize frame");
            Some(CloseCode::GoingAway)
        })?;
        self.write(sink, WsMessage::Text(json.into())).await
    }

    fn on_inbound(&self, msg: WsMessage) -> Inbound {
        let len = match &msg {
            WsMessage::Text(text) => text.as_str().len(),
            WsMessage::Binary(bytes) => bytes.len(),
            _ => 0,
        };
        if len > self.max_frame_bytes {
            let e = ChatError::Validation(format!(
                "frame of {len} bytes exceeds the {} byte limit",
                self.max_frame_bytes
            ));
            debug!(kind = e.kind(), len, "oversize frame");
            return Inbound::Refuse(ServerFrame::from_error(&e), CloseCode::MessageTooBig);
        }

        match msg {
            WsMessage::Text(text) => self.on_text(text.as_str()),
            WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.on_text(text),
                Err(_) => self.reject(ChatError::Validation(
                    "binary frames must contain UTF-8 text".into(),
                )),
            },
            WsMessage::Close(_) => Inbound::PeerClosed,
            WsMessage::Ping(_) | WsMessage::Pong(_) => Inbound::Ignore,
        }
    }

    fn on_text(&self, raw: &str) -> Inbound {
        let posted = InboundFrame::parse(raw).and_then(|frame| {
            self.chat
                .post_message(&self.identity, &self.conversation_id, &frame.message)
        });
        match posted {
            Ok(_) => Inbound::Ignore,
            Err(e) => self.reject(e),
        }
    }

    fn reject(&self, e: ChatError) -> Inbound {
        if e.is_client_error() {
            debug!(kind = e.kind(), error = %e, "frame rejected");
        } else {
            error!(kind = e.kind(), error = %e, "failed to handle frame");
        }
        Inbound::Reply(ServerFrame::from_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use clixs_core::{ListingId, UserId};
    use clixs_store::{ConversationRepo, Database};
    use secrecy::SecretString;

    #[test]
    fn happy_path_transitions() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Joined));
        assert!(Joined.can_transition_to(Active));
        assert!(Active.can_transition_to(Closed));
    }

    #[test]
    fn every_live_state_can_close() {
        use SessionState::*;
        for state in [Connecting, Authenticated, Joined, Active] {
            assert!(state.can_transition_to(Closed), "{state:?}");
        }
        assert!(!Closed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Active));
    }

    #[test]
    fn states_cannot_be_skipped() {
        use SessionState::*;
        assert!(!Connecting.can_transition_to(Joined));
        assert!(!Authenticated.can_transition_to(Active));
        assert!(!Active.can_transition_to(Joined));
    }

    #[test]
    fn rejection_mapping() {
        let unauth = Rejection::from_error(ChatError::Unauthenticated("expired".into()));
        assert_eq!(unauth.status, StatusCode::UNAUTHORIZED);
        assert_eq!(unauth.close_code, Some(CloseCode::Unauthenticated));

        let forbidden = Rejection::from_error(ChatError::NotParticipant);
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        assert_eq!(forbidden.close_code, Some(CloseCode::Forbidden));

        let internal = Rejection::from_error(ChatError::Internal("db".into()));
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.close_code, None);
    }

    #[test]
    fn authorize_checks_token_then_membership() {
        let db = Database::in_memory().unwrap();
        let (conv, _) = ConversationRepo::new(db.clone())
            .get_or_create(
                &ListingId::from_raw("lst_1"),
                "Lamp",
                &UserId::from_raw("usr_a"),
                &UserId::from_raw("usr_b"),
            )
            .unwrap();
        let gate = AuthorizationGate::new(db);
        let verifier = JwtVerifier::new(&SecretString::from("s"), None);
        let ttl = Duration::from_secs(60);
        let token_for = |id: &str| verifier.issue(&UserId::from_raw(id), ttl).unwrap();

        let b = token_for("usr_b");
        let identity = authorize(&verifier, &gate, Some(b.as_str()), &conv.id).unwrap();
        assert_eq!(identity.user_id, UserId::from_raw("usr_b"));

        let missing = authorize(&verifier, &gate, None, &conv.id).unwrap_err();
        assert_eq!(missing.close_code, Some(CloseCode::Unauthenticated));

        let garbage = authorize(&verifier, &gate, Some("nope"), &conv.id).unwrap_err();
        assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);

        let d = token_for("usr_d");
        let outsider = authorize(&verifier, &gate, Some(d.as_str()), &conv.id).unwrap_err();
        assert_eq!(outsider.close_code, Some(CloseCode::Forbidden));

        let unknown = authorize(
            &verifier,
            &gate,
            Some(token_for("usr_a").as_str()),
            &ConversationId::from_raw("conv_missing"),
        )
        .unwrap_err();
        assert_eq!(unknown.status, StatusCode::FORBIDDEN);
    }
}
