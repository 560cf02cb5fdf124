//! Axum router and server lifecycle.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use clixs_core::ListingLookup;
use clixs_store::Database;

use crate::auth::CredentialVerifier;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::handlers;
use crate::health::{self, HealthResponse};
use crate::rooms::{InProcessRooms, RoomRegistry};
use crate::shutdown::ShutdownCoordinator;

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub config: Arc<ServerConfig>,
    pub shutdown: Arc<ShutdownCoordinator>,
    /// One task per upgraded chat connection.
    pub sessions: TaskTracker,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the chat service to an in-process room registry.
    pub fn new(
        config: ServerConfig,
        db: Database,
        verifier: Arc<dyn CredentialVerifier>,
        listings: Arc<dyn ListingLookup>,
    ) -> Self {
        let rooms: Arc<dyn RoomRegistry> = Arc::new(InProcessRooms::new());
        let chat = ChatService::new(db, listings, rooms, config.max_body_chars);
        Self {
            chat: Arc::new(chat),
            verifier,
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            sessions: TaskTracker::new(),
            start_time: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat/{conversation_id}", get(handlers::ws_handler))
        .route("/ws/chat/{conversation_id}/", get(handlers::ws_handler))
        .route(
            "/api/conversations",
            get(handlers::list_conversations).post(handlers::start_conversation),
        )
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(handlers::list_messages),
        )
        .route(
            "/api/conversations/{conversation_id}/read",
            post(handlers::mark_read),
        )
        .route(
            "/api/conversations/{conversation_id}/close",
            post(handlers::close_conversation),
        )
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let rooms = state.chat.rooms();
    Json(health::health_check(
        state.start_time,
        rooms.room_count(),
        rooms.session_count(),
    ))
}

/// Bind, then serve in the background until [`ServerHandle::shutdown`].
pub async fn start(
    config: ServerConfig,
    db: Database,
    verifier: Arc<dyn CredentialVerifier>,
    listings: Arc<dyn ListingLookup>,
) -> Result<ServerHandle, std::io::Error> {
    let addr = config.bind_addr();
    let state = AppState::new(config, db, verifier, listings);
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "chat server started");

    let token = state.shutdown.token();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        state,
        server,
    })
}

/// Handle to a running server.
pub struct ServerHandle {
    pub port: u16,
    state: AppState,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn chat(&self) -> &Arc<ChatService> {
        &self.state.chat
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Session tasks still running, including ones already evicted from their room.
    pub fn live_sessions(&self) -> usize {
        self.state.sessions.len()
    }

    /// Stop accepting connections, close live sessions with 1001, and wait for the listener.
    pub async fn shutdown(self) {
        let timeout = self.state.config.shutdown_timeout();
        self.state
            .shutdown
            .graceful_shutdown(vec![self.server], timeout)
            .await;

        let sessions = &self.state.sessions;
        sessions.close();
        if tokio::time::timeout(timeout, sessions.wait()).await.is_err() {
            warn!(remaining = sessions.len(), "chat sessions still running after shutdown");
        }
        info!("chat server stopped");
    }

    /// Wait until the server task exits.
    pub async fn wait(self) {
        let _ = self.server.await;
    }
}
