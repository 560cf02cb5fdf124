//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: String,
    pub uptime_secs: u64,
    /// Conversations with at least one live session.
    pub rooms: usize,
    /// Live sessions across all rooms.
    pub sessions: usize,
}

pub fn health_check(start_time: Instant, rooms: usize, sessions: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        rooms,
        sessions,
    }
}
