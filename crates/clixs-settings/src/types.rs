//! Settings types. Every struct is `#[serde(default)]`, so a partial file only overrides the
//! keys it names.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

/// Root settings object, mirroring `~/.clixs/settings.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

/// Network and connection-session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    /// `0` asks the OS for a free port.
    pub port: u16,
    /// Frames queued per session before it counts as a slow consumer.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// A session with no inbound traffic for this long is closed.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound frame handled, in bytes. Bigger frames get a validation error and a 1009
    /// close.
    pub max_message_size: usize,
    /// Limit on a message body, in characters.
    pub max_body_chars: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_send_queue: 64,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 256 * 1024,
            max_body_chars: 2000,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Bearer token verification.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret. Never written back out.
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub jwt_secret: Option<SecretString>,
    /// Expected `iss` claim, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Lifetime of tokens minted by `clixs token`.
    pub token_ttl_secs: u64,
    /// Reject tokens whose subject has no active account in the account mirror.
    pub require_active_account: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            issuer: None,
            token_ttl_secs: 3600,
            require_active_account: true,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Chat database path; relative paths resolve against `~/.clixs`.
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "chat.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
    /// Persist warn+ records to `logDbPath`.
    pub log_to_sqlite: bool,
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            log_to_sqlite: false,
            log_db_path: "logs.db".to_string(),
        }
    }
}

/// `~/.clixs`, falling back to `/tmp/.clixs` when `HOME` is unset.
pub fn clixs_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".clixs")
}

/// Resolve a configured path against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl ChatSettings {
    pub fn db_path(&self) -> PathBuf {
        resolve_path(&clixs_home(), &self.store.db_path)
    }

    pub fn log_db_path(&self) -> PathBuf {
        resolve_path(&clixs_home(), &self.logging.log_db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults() {
        let settings = ChatSettings::default();
        assert_eq!(settings.server.max_send_queue, 64);
        assert_eq!(settings.server.max_body_chars, 2000);
        assert!(settings.server.heartbeat_timeout_secs > settings.server.heartbeat_interval_secs);
        assert!(settings.auth.jwt_secret.is_none());
        assert_eq!(settings.logging.format, "json");
    }

    #[test]
    fn secret_is_read_but_never_serialized() {
        let settings: ChatSettings =
            serde_json::from_str(r#"{"auth": {"jwtSecret": "s3cret"}}"#).unwrap();
        assert_eq!(
            settings.auth.jwt_secret.as_ref().unwrap().expose_secret(),
            "s3cret"
        );

        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!json.contains("jwtSecret"));
        assert!(!format!("{settings:?}").contains("s3cret"));
    }

    #[test]
    fn empty_secret_is_none() {
        let settings: ChatSettings =
            serde_json::from_str(r#"{"auth": {"jwtSecret": ""}}"#).unwrap();
        assert!(settings.auth.jwt_secret.is_none());
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let base = Path::new("/srv/clixs");
        assert_eq!(resolve_path(base, "chat.db"), PathBuf::from("/srv/clixs/chat.db"));
        assert_eq!(resolve_path(base, "/var/chat.db"), PathBuf::from("/var/chat.db"));
    }
}
