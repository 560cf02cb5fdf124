//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{clixs_home, ChatSettings};

/// Resolve the path to the settings file (`~/.clixs/settings.json`).
pub fn settings_path() -> PathBuf {
    clixs_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ChatSettings> {
    let defaults = serde_json::to_value(ChatSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ChatSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CLIXS_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning, leaving the file/default value in place.
pub fn apply_env_overrides<F>(settings: &mut ChatSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("CLIXS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("CLIXS_PORT", 0u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.ranged("CLIXS_MAX_SEND_QUEUE", 1usize, 100_000) {
        settings.server.max_send_queue = v;
    }
    if let Some(v) = env.ranged("CLIXS_MAX_BODY_CHARS", 1usize, 100_000) {
        settings.server.max_body_chars = v;
    }
    if let Some(v) = env.string("CLIXS_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = env.string("CLIXS_JWT_SECRET") {
        settings.auth.jwt_secret = Some(SecretString::from(v));
    }
    if let Some(v) = env.string("CLIXS_JWT_ISSUER") {
        settings.auth.issuer = Some(v);
    }
    if let Some(v) = env.ranged("CLIXS_TOKEN_TTL_SECS", 1u64, 31_536_000) {
        settings.auth.token_ttl_secs = v;
    }
    if let Some(v) = env.string("CLIXS_LOG_FORMAT") {
        if matches!(v.to_ascii_lowercase().as_str(), "json" | "pretty" | "text") {
            settings.logging.format = v.to_ascii_lowercase();
        } else {
            tracing::warn!(
                key = "CLIXS_LOG_FORMAT",
                value = %v,
                "invalid log format env var, ignoring"
            );
        }
    }
    if let Some(v) = env.string("CLIXS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.boolean("CLIXS_LOG_TO_SQLITE") {
        settings.logging.log_to_sqlite = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = self.string(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}
