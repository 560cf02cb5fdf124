//! Fixed-width UTC timestamps.
//!
//! Every persisted or emitted timestamp uses `YYYY-MM-DDTHH:MM:SS.ffffffZ`, so comparing the
//! text form gives the same answer as comparing the instants. SQLite ordering relies on that.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Current time truncated to the stored precision, so a value read back compares equal.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}
