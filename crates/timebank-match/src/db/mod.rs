// db/mod.rs
// SQLite persistence for the tables the matching engine owns:
// match_cache, match_history, user_category_affinity,
// user_distance_preference, match_preferences.

pub mod cache;
pub mod history;
pub mod learning;
pub mod pool;
pub mod preferences;
pub mod schema;

pub use pool::DatabasePool;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a SQLite timestamp column (CURRENT_TIMESTAMP format or RFC 3339)
/// into a UTC datetime. Returns None for absent or unparseable values.
pub(crate) fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    let raw = value?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
