// db/history.rs
// match_history: append-only interaction ledger
//
// Rows are immutable after insert with one exception: conversion
// attribution updates a single row exactly once, guarded by the
// resulted_in_transaction flag.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use timebank_types::{InteractionMetadata, MatchAction};

/// A row from match_history.
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub id: i64,
    pub user_id: i64,
    pub listing_id: i64,
    pub action: MatchAction,
    pub match_score: Option<f64>,
    pub category_id: Option<i64>,
    pub distance_km: Option<f64>,
    pub resulted_in_transaction: bool,
    pub transaction_id: Option<i64>,
    pub conversion_time: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

fn parse_event(row: &rusqlite::Row) -> rusqlite::Result<HistoryEvent> {
    let action_str: String = row.get(3)?;
    let conversion_time: Option<String> = row.get(9)?;
    let created_at: Option<String> = row.get(10)?;

    Ok(HistoryEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        listing_id: row.get(2)?,
        action: MatchAction::parse(&action_str).unwrap_or(MatchAction::Viewed),
        match_score: row.get(4)?,
        category_id: row.get(5)?,
        distance_km: row.get(6)?,
        resulted_in_transaction: row.get::<_, i64>(7)? != 0,
        transaction_id: row.get(8)?,
        conversion_time: super::parse_timestamp(conversion_time),
        created_at: super::parse_timestamp(created_at),
    })
}

const EVENT_COLUMNS: &str = "id, user_id, listing_id, action, match_score, category_id, \
     distance_km, resulted_in_transaction, transaction_id, conversion_time, created_at";

/// Append an interaction event.
pub fn append_event_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    listing_id: i64,
    action: MatchAction,
    metadata: &InteractionMetadata,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO match_history
            (tenant_id, user_id, listing_id, action, match_score, category_id, distance_km)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            tenant_id,
            user_id,
            listing_id,
            action.as_str(),
            metadata.match_score,
            metadata.category_id,
            metadata.distance_km,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Attribute a completed transaction to the most recent qualifying
/// interaction (contacted, saved or viewed, in that order of recency).
///
/// Sets the conversion fields and flips the action to `completed`. The
/// resulted_in_transaction guard makes the update exactly-once; a second
/// attribution for the same pair picks the next qualifying row or reports
/// not-found. Returns false when no qualifying row exists - nothing is
/// fabricated.
pub fn mark_conversion_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    listing_id: i64,
    transaction_id: i64,
) -> Result<bool> {
    let target: Option<i64> = conn
        .query_row(
            "SELECT id FROM match_history
             WHERE tenant_id = ? AND user_id = ? AND listing_id = ?
               AND action IN ('contacted', 'saved', 'viewed')
               AND resulted_in_transaction = 0
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            params![tenant_id, user_id, listing_id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(id) = target else {
        return Ok(false);
    };

    let updated = conn.execute(
        "UPDATE match_history
         SET action = 'completed',
             resulted_in_transaction = 1,
             transaction_id = ?1,
             conversion_time = datetime('now')
         WHERE id = ?2 AND resulted_in_transaction = 0",
        params![transaction_id, id],
    )?;
    Ok(updated > 0)
}

/// Most recent event for a pair, if any.
pub fn latest_event_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    listing_id: i64,
) -> Result<Option<HistoryEvent>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM match_history
         WHERE tenant_id = ? AND user_id = ? AND listing_id = ?
         ORDER BY created_at DESC, id DESC
         LIMIT 1"
    );
    conn.query_row(&sql, params![tenant_id, user_id, listing_id], parse_event)
        .optional()
        .map_err(Into::into)
}

/// All events for a user, newest first. Capped by the caller's limit.
pub fn events_for_user_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    limit: usize,
) -> Result<Vec<HistoryEvent>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM match_history
         WHERE tenant_id = ? AND user_id = ?
         ORDER BY created_at DESC, id DESC
         LIMIT ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![tenant_id, user_id, limit as i64], parse_event)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Whether a notification was already recorded for this listing within the
/// window. The sweep uses this so a listing is only pushed once per run
/// window regardless of how many users match it.
pub fn listing_notified_within_sync(
    conn: &Connection,
    tenant_id: i64,
    listing_id: i64,
    window_hours: i64,
) -> Result<bool> {
    let window = format!("-{} hours", window_hours);
    let exists = conn
        .prepare(
            "SELECT 1 FROM match_history
             WHERE tenant_id = ? AND listing_id = ? AND action = 'notified'
               AND created_at > datetime('now', ?)",
        )?
        .exists(params![tenant_id, listing_id, window])?;
    Ok(exists)
}
