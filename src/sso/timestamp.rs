//! Timestamp encoding for cache files.
//!
//! Files written by this crate use ISO-8601 instants (`2020-04-07T21:31:33Z`).
//! Files written by the AWS CLI may instead use `2020-04-07T21:31:33UTC`,
//! which carries no offset and is implicitly UTC. Both are accepted on read.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// `strftime` pattern of the AWS CLI cache format.
const CLI_FORMAT: &str = "%Y-%m-%dT%H:%M:%SUTC";

/// Parse an instant in either supported encoding.
///
/// Standard ISO-8601 is tried first, then the CLI pattern.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, CLI_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format an instant as ISO-8601 in UTC, with fractional seconds only when
/// they are non-zero.
pub fn format_instant(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Serde adapter for `DateTime<Utc>` fields stored in cache files.
pub mod iso_instant {
    use super::*;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_instant(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_instant(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{raw}'")))
    }
}
