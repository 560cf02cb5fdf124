//! Server configuration.

use std::time::Duration;

use clixs_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the chat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Capacity of each session's outbound queue.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// Close a session after this long without any inbound frame or pong.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound frame handled, in bytes.
    pub max_message_size: usize,
    /// Max message body length in characters, after trimming.
    pub max_body_chars: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_send_queue: 64,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 256 * 1024,
            max_body_chars: clixs_core::MAX_BODY_CHARS,
            shutdown_timeout_secs: 10,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_send_queue: s.max_send_queue.max(1),
            heartbeat_interval_secs: s.heartbeat_interval_secs.max(1),
            heartbeat_timeout_secs: s.heartbeat_timeout_secs.max(1),
            max_message_size: s.max_message_size,
            max_body_chars: s.max_body_chars,
            shutdown_timeout_secs: s.shutdown_timeout_secs,
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Hard cap handed to the WebSocket codec. Frames between `max_message_size` and this are
    /// read and refused with 1009; anything larger drops the connection.
    pub fn transport_limit(&self) -> usize {
        self.max_message_size.saturating_mul(4)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_send_queue, 64);
        assert_eq!(cfg.max_body_chars, 2000);
        assert_eq!(cfg.transport_limit(), 4 * cfg.max_message_size);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn from_settings_clamps_zero_values() {
        let settings = ServerSettings {
            port: 8123,
            max_send_queue: 0,
            heartbeat_interval_secs: 0,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.port, 8123);
        assert_eq!(cfg.max_send_queue, 1);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"max_send_queue":8,
            "heartbeat_interval_secs":10,"heartbeat_timeout_secs":30,"max_message_size":512,
            "max_body_chars":100,"shutdown_timeout_secs":1}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.max_send_queue, 8);
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(30));
    }
}
