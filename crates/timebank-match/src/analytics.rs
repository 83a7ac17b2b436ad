// crates/timebank-match/src/analytics.rs
// Read-only aggregation over the engine's tables for dashboards.
//
// This is an operational surface, not part of the matching contract: every
// aggregate degrades to zero-filled values rather than erroring, so a
// dashboard can render against an empty or half-provisioned tenant.

use std::sync::Arc;

use anyhow::Result;
use rusqlite::{Connection, params};
use timebank_types::{
    AnalyticsSnapshot, CategoryConversion, ConversionFunnel, DistributionBucket,
};

use crate::db::DatabasePool;

const SCORE_BANDS: [(&str, f64, f64); 4] = [
    ("0-40", 0.0, 40.0),
    ("40-60", 40.0, 60.0),
    ("60-80", 60.0, 80.0),
    ("80-100", 80.0, 100.1),
];

const DISTANCE_BANDS: [(&str, f64, f64); 5] = [
    ("0-2 km", 0.0, 2.0),
    ("2-5 km", 2.0, 5.0),
    ("5-15 km", 5.0, 15.0),
    ("15-50 km", 15.0, 50.0),
    ("50+ km", 50.0, f64::MAX),
];

/// Read-only reporting over match_cache, match_history and the learning
/// tables.
pub struct AnalyticsReporter {
    pool: Arc<DatabasePool>,
}

impl AnalyticsReporter {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    /// Full dashboard snapshot for a tenant. Never errors: any failure
    /// logs and yields the zero-filled default.
    pub async fn dashboard_summary(&self, tenant_id: i64) -> AnalyticsSnapshot {
        self.pool
            .try_interact("dashboard summary", move |conn| {
                dashboard_summary_sync(conn, tenant_id)
            })
            .await
            .unwrap_or_default()
    }
}

/// Build the snapshot on one connection.
pub fn dashboard_summary_sync(conn: &Connection, tenant_id: i64) -> Result<AnalyticsSnapshot> {
    Ok(AnalyticsSnapshot {
        score_distribution: score_distribution(conn, tenant_id)?,
        distance_distribution: distance_distribution(conn, tenant_id)?,
        funnel: conversion_funnel(conn, tenant_id)?,
        avg_hours_to_conversion: avg_hours_to_conversion(conn, tenant_id)?,
        top_converting_categories: top_converting_categories(conn, tenant_id)?,
    })
}

fn score_distribution(conn: &Connection, tenant_id: i64) -> Result<Vec<DistributionBucket>> {
    let mut buckets = Vec::with_capacity(SCORE_BANDS.len());
    let mut stmt = conn.prepare(
        "SELECT COUNT(*) FROM match_cache
         WHERE tenant_id = ? AND match_score >= ? AND match_score < ?",
    )?;
    for (label, low, high) in SCORE_BANDS {
        let count: i64 = stmt.query_row(params![tenant_id, low, high], |row| row.get(0))?;
        buckets.push(DistributionBucket {
            label: label.to_string(),
            count,
        });
    }
    Ok(buckets)
}

fn distance_distribution(conn: &Connection, tenant_id: i64) -> Result<Vec<DistributionBucket>> {
    let mut buckets = Vec::with_capacity(DISTANCE_BANDS.len());
    let mut stmt = conn.prepare(
        "SELECT COUNT(*) FROM match_cache
         WHERE tenant_id = ? AND distance_km IS NOT NULL
           AND distance_km >= ? AND distance_km < ?",
    )?;
    for (label, low, high) in DISTANCE_BANDS {
        let count: i64 = stmt.query_row(params![tenant_id, low, high], |row| row.get(0))?;
        buckets.push(DistributionBucket {
            label: label.to_string(),
            count,
        });
    }
    Ok(buckets)
}

fn conversion_funnel(conn: &Connection, tenant_id: i64) -> Result<ConversionFunnel> {
    let matched: i64 = conn.query_row(
        "SELECT COUNT(*) FROM match_cache WHERE tenant_id = ?",
        params![tenant_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT COUNT(DISTINCT user_id || ':' || listing_id)
         FROM match_history
         WHERE tenant_id = ? AND action = ?",
    )?;
    let count_action = |stmt: &mut rusqlite::Statement<'_>, action: &str| -> Result<i64> {
        Ok(stmt.query_row(params![tenant_id, action], |row| row.get(0))?)
    };

    let viewed = count_action(&mut stmt, "viewed")?;
    let contacted = count_action(&mut stmt, "contacted")?;
    let completed = count_action(&mut stmt, "completed")?;

    let conversion_rate = if matched > 0 {
        completed as f64 / matched as f64
    } else {
        0.0
    };

    Ok(ConversionFunnel {
        matched,
        viewed,
        contacted,
        completed,
        conversion_rate,
    })
}

fn avg_hours_to_conversion(conn: &Connection, tenant_id: i64) -> Result<Option<f64>> {
    let avg: Option<f64> = conn.query_row(
        "SELECT AVG((julianday(conversion_time) - julianday(created_at)) * 24.0)
         FROM match_history
         WHERE tenant_id = ? AND resulted_in_transaction = 1
           AND conversion_time IS NOT NULL",
        params![tenant_id],
        |row| row.get(0),
    )?;
    Ok(avg)
}

fn top_converting_categories(conn: &Connection, tenant_id: i64) -> Result<Vec<CategoryConversion>> {
    let mut stmt = conn.prepare(
        "SELECT category_id, COUNT(*) AS completions
         FROM match_history
         WHERE tenant_id = ? AND action = 'completed' AND category_id IS NOT NULL
         GROUP BY category_id
         ORDER BY completions DESC, category_id ASC
         LIMIT 5",
    )?;
    let rows = stmt.query_map(params![tenant_id], |row| {
        Ok(CategoryConversion {
            category_id: row.get(0)?,
            completed: row.get(1)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}
