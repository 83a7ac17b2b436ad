// db/schema.rs
// Schema for the five tables the matching engine owns

use anyhow::Result;
use rusqlite::Connection;

/// Run all schema setup and migrations.
///
/// Called during pool initialization. Idempotent - existing tables and
/// columns are left alone. This is the engine's schema-readiness check: it
/// runs once at startup, and every later query may assume the tables exist.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    migrate_cache_expires_at(conn)?;
    Ok(())
}

/// Database schema SQL
pub const SCHEMA: &str = r#"
-- =======================================
-- MATCH CACHE: computed suggestions with lifecycle status
-- =======================================
CREATE TABLE IF NOT EXISTS match_cache (
    id INTEGER PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    listing_id INTEGER NOT NULL,
    match_score REAL NOT NULL DEFAULT 0,
    match_type TEXT NOT NULL DEFAULT 'standard',
    distance_km REAL,
    match_reasons TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    expires_at TEXT,
    UNIQUE(tenant_id, user_id, listing_id)
);

CREATE INDEX IF NOT EXISTS idx_match_cache_user
    ON match_cache(tenant_id, user_id, status);
CREATE INDEX IF NOT EXISTS idx_match_cache_expires
    ON match_cache(expires_at);

-- =======================================
-- MATCH HISTORY: append-only interaction ledger
-- =======================================
CREATE TABLE IF NOT EXISTS match_history (
    id INTEGER PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    listing_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    match_score REAL,
    category_id INTEGER,
    distance_km REAL,
    resulted_in_transaction INTEGER NOT NULL DEFAULT 0,
    transaction_id INTEGER,
    conversion_time TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_match_history_pair
    ON match_history(tenant_id, user_id, listing_id, created_at);
CREATE INDEX IF NOT EXISTS idx_match_history_action
    ON match_history(tenant_id, action);

-- =======================================
-- LEARNING: per-(user, category) affinity
-- =======================================
CREATE TABLE IF NOT EXISTS user_category_affinity (
    id INTEGER PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    affinity_score REAL NOT NULL DEFAULT 50,
    viewed_count INTEGER NOT NULL DEFAULT 0,
    saved_count INTEGER NOT NULL DEFAULT 0,
    contacted_count INTEGER NOT NULL DEFAULT 0,
    completed_count INTEGER NOT NULL DEFAULT 0,
    dismissed_count INTEGER NOT NULL DEFAULT 0,
    last_interaction TEXT,
    UNIQUE(user_id, category_id)
);

CREATE INDEX IF NOT EXISTS idx_affinity_user
    ON user_category_affinity(tenant_id, user_id);

-- =======================================
-- LEARNING: per-user distance tolerance buckets
-- =======================================
CREATE TABLE IF NOT EXISTS user_distance_preference (
    id INTEGER PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    under_2_km INTEGER NOT NULL DEFAULT 0,
    km_2_to_5 INTEGER NOT NULL DEFAULT 0,
    km_5_to_15 INTEGER NOT NULL DEFAULT 0,
    km_15_to_50 INTEGER NOT NULL DEFAULT 0,
    over_50_km INTEGER NOT NULL DEFAULT 0,
    stated_max_distance_km REAL,
    learned_max_distance_km REAL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(user_id)
);

-- =======================================
-- PREFERENCES: explicit per-user matching settings
-- =======================================
CREATE TABLE IF NOT EXISTS match_preferences (
    id INTEGER PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    max_distance_km REAL,
    min_match_score REAL,
    notify_hot_matches INTEGER NOT NULL DEFAULT 1,
    notify_mutual_matches INTEGER NOT NULL DEFAULT 1,
    notification_frequency TEXT NOT NULL DEFAULT 'daily',
    categories TEXT,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(tenant_id, user_id)
);
"#;

/// Add expires_at to match_cache databases created before cache expiry
/// existed.
fn migrate_cache_expires_at(conn: &Connection) -> Result<()> {
    let has_column: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('match_cache') WHERE name = 'expires_at'")?
        .exists([])?;

    if !has_column {
        conn.execute_batch("ALTER TABLE match_cache ADD COLUMN expires_at TEXT;")?;
        tracing::info!("Migrated match_cache: added expires_at");
    }
    Ok(())
}
