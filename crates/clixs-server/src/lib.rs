pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod health;
pub mod rooms;
pub mod server;
pub mod session;
pub mod shutdown;

pub use auth::{AuthError, CredentialVerifier, JwtVerifier};
pub use chat::ChatService;
pub use config::ServerConfig;
pub use gate::AuthorizationGate;
pub use rooms::{InProcessRooms, RoomRegistry, SessionHandle};
pub use server::{build_router, start, AppState, ServerHandle};
pub use shutdown::ShutdownCoordinator;
