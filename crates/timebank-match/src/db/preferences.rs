// db/preferences.rs
// match_preferences: explicit per-user matching settings

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use timebank_types::MatchPreferences;

use crate::config::MatchConfig;

/// Preferences for a user, with tenant defaults filled in for any field the
/// user never set. Absence of a row is not an error.
pub fn get_preferences_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    config: &MatchConfig,
) -> Result<MatchPreferences> {
    let row = conn
        .query_row(
            "SELECT max_distance_km, min_match_score, notify_hot_matches,
                    notify_mutual_matches, notification_frequency, categories
             FROM match_preferences
             WHERE tenant_id = ? AND user_id = ?",
            params![tenant_id, user_id],
            |row| {
                let categories_json: Option<String> = row.get(5)?;
                Ok((
                    row.get::<_, Option<f64>>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, i64>(2)? != 0,
                    row.get::<_, i64>(3)? != 0,
                    row.get::<_, String>(4)?,
                    categories_json,
                ))
            },
        )
        .optional()?;

    let defaults = MatchPreferences {
        max_distance_km: config.max_distance_km,
        min_match_score: config.min_match_score,
        ..MatchPreferences::default()
    };

    let Some((max_distance, min_score, hot, mutual, frequency, categories_json)) = row else {
        return Ok(defaults);
    };

    Ok(MatchPreferences {
        max_distance_km: max_distance.unwrap_or(defaults.max_distance_km),
        min_match_score: min_score.unwrap_or(defaults.min_match_score),
        notify_hot_matches: hot,
        notify_mutual_matches: mutual,
        notification_frequency: frequency,
        categories: categories_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
    })
}

/// Upsert a user's preferences.
pub fn save_preferences_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    prefs: &MatchPreferences,
) -> Result<()> {
    let categories = prefs
        .categories
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO match_preferences
            (tenant_id, user_id, max_distance_km, min_match_score,
             notify_hot_matches, notify_mutual_matches, notification_frequency, categories)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(tenant_id, user_id) DO UPDATE SET
            max_distance_km = excluded.max_distance_km,
            min_match_score = excluded.min_match_score,
            notify_hot_matches = excluded.notify_hot_matches,
            notify_mutual_matches = excluded.notify_mutual_matches,
            notification_frequency = excluded.notification_frequency,
            categories = excluded.categories,
            updated_at = CURRENT_TIMESTAMP",
        params![
            tenant_id,
            user_id,
            prefs.max_distance_km,
            prefs.min_match_score,
            prefs.notify_hot_matches as i64,
            prefs.notify_mutual_matches as i64,
            prefs.notification_frequency,
            categories,
        ],
    )?;
    Ok(())
}
