// db/cache.rs
// match_cache operations: computed suggestions with forward-only status

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use timebank_types::{MatchResult, MatchStatus, MatchType};

/// Rank of a stored status value, for conditional lattice updates.
/// Must stay in sync with [`MatchStatus::rank`].
const STATUS_RANK_CASE: &str = "CASE match_cache.status \
     WHEN 'new' THEN 0 WHEN 'viewed' THEN 1 WHEN 'saved' THEN 2 \
     WHEN 'contacted' THEN 3 WHEN 'dismissed' THEN 4 WHEN 'completed' THEN 5 \
     ELSE -1 END";

/// A row from match_cache.
#[derive(Debug, Clone)]
pub struct CachedMatch {
    pub listing_id: i64,
    pub match_score: f64,
    pub match_type: MatchType,
    pub distance_km: Option<f64>,
    pub reasons: Vec<String>,
    pub status: MatchStatus,
    pub created_at: Option<DateTime<Utc>>,
}

fn parse_cached_match(row: &rusqlite::Row) -> rusqlite::Result<CachedMatch> {
    let type_str: String = row.get(2)?;
    let reasons_json: Option<String> = row.get(4)?;
    let status_str: String = row.get(5)?;
    let created_at: Option<String> = row.get(6)?;

    Ok(CachedMatch {
        listing_id: row.get(0)?,
        match_score: row.get(1)?,
        match_type: MatchType::parse(&type_str).unwrap_or(MatchType::Standard),
        distance_km: row.get(3)?,
        reasons: reasons_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default(),
        status: MatchStatus::parse(&status_str).unwrap_or(MatchStatus::New),
        created_at: super::parse_timestamp(created_at),
    })
}

/// Store or refresh a computed suggestion.
///
/// A recompute updates score, type, distance, reasons and the expiry window
/// but never touches status - a stale recompute must not undo lifecycle
/// progress recorded in the meantime.
pub fn upsert_match_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    result: &MatchResult,
    ttl_days: i64,
) -> Result<()> {
    let reasons = serde_json::to_string(&result.reasons)?;
    let ttl_modifier = format!("+{} days", ttl_days);

    conn.execute(
        "INSERT INTO match_cache
            (tenant_id, user_id, listing_id, match_score, match_type,
             distance_km, match_reasons, status, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'new', datetime('now', ?8))
         ON CONFLICT(tenant_id, user_id, listing_id) DO UPDATE SET
            match_score = excluded.match_score,
            match_type = excluded.match_type,
            distance_km = excluded.distance_km,
            match_reasons = excluded.match_reasons,
            updated_at = CURRENT_TIMESTAMP,
            expires_at = excluded.expires_at",
        params![
            tenant_id,
            user_id,
            result.listing.id,
            result.score,
            result.match_type.as_str(),
            result.distance_km,
            reasons,
            ttl_modifier,
        ],
    )?;
    Ok(())
}

/// Advance the status of a cache entry along the lattice.
///
/// Creates the entry when absent (a user can interact with a listing that
/// was never suggested). The update is conditional: it only applies when
/// the new status ranks strictly above the stored one, so concurrent or
/// out-of-order writes can never regress a `completed` entry.
///
/// Returns true when a row was inserted or advanced.
pub fn advance_status_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    listing_id: i64,
    status: MatchStatus,
) -> Result<bool> {
    let sql = format!(
        "INSERT INTO match_cache (tenant_id, user_id, listing_id, status)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(tenant_id, user_id, listing_id) DO UPDATE SET
            status = excluded.status,
            updated_at = CURRENT_TIMESTAMP
         WHERE ({STATUS_RANK_CASE}) < ?5"
    );
    let changed = conn.execute(
        &sql,
        params![tenant_id, user_id, listing_id, status.as_str(), status.rank()],
    )?;
    Ok(changed > 0)
}

/// Current status of a cache entry, if one exists.
pub fn get_status_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    listing_id: i64,
) -> Result<Option<MatchStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM match_cache
             WHERE tenant_id = ? AND user_id = ? AND listing_id = ?",
            params![tenant_id, user_id, listing_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status.as_deref().and_then(MatchStatus::parse))
}

/// Cached matches for a user, optionally filtered by match type.
pub fn get_matches_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    match_type: Option<MatchType>,
    limit: usize,
) -> Result<Vec<CachedMatch>> {
    let mut stmt = conn.prepare(
        "SELECT listing_id, match_score, match_type, distance_km,
                match_reasons, status, created_at
         FROM match_cache
         WHERE tenant_id = ?1 AND user_id = ?2
           AND (?3 IS NULL OR match_type = ?3)
           AND status != 'dismissed'
         ORDER BY match_score DESC, created_at DESC, listing_id ASC
         LIMIT ?4",
    )?;

    let rows = stmt.query_map(
        params![
            tenant_id,
            user_id,
            match_type.map(MatchType::as_str),
            limit as i64
        ],
        parse_cached_match,
    )?;

    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Drop every cached match for a user. Called when the user's listings or
/// preferences change.
pub fn invalidate_user_sync(conn: &Connection, tenant_id: i64, user_id: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM match_cache WHERE tenant_id = ? AND user_id = ?",
        params![tenant_id, user_id],
    )?;
    Ok(deleted)
}

/// Drop cached matches pointing at the given listings. Called when listings
/// in a category change and their cached scores may be stale.
pub fn invalidate_listings_sync(
    conn: &Connection,
    tenant_id: i64,
    listing_ids: &[i64],
) -> Result<usize> {
    let mut deleted = 0;
    let mut stmt =
        conn.prepare("DELETE FROM match_cache WHERE tenant_id = ? AND listing_id = ?")?;
    for listing_id in listing_ids {
        deleted += stmt.execute(params![tenant_id, listing_id])?;
    }
    Ok(deleted)
}

/// Remove expired entries. Run periodically from the surrounding
/// application's scheduler.
pub fn clear_expired_sync(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM match_cache WHERE expires_at IS NOT NULL AND expires_at < datetime('now')",
        [],
    )?;
    Ok(deleted)
}

/// Whether this pair was already surfaced to the user recently (used by the
/// notification sweep for dedup). Dismissed entries do not count.
pub fn recently_notified_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    listing_id: i64,
    window_days: i64,
) -> Result<bool> {
    let window = format!("-{} days", window_days);
    let exists = conn
        .prepare(
            "SELECT 1 FROM match_cache
             WHERE tenant_id = ? AND user_id = ? AND listing_id = ?
               AND status != 'dismissed'
               AND created_at > datetime('now', ?)",
        )?
        .exists(params![tenant_id, user_id, listing_id, window])?;
    Ok(exists)
}
