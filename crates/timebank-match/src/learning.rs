// crates/timebank-match/src/learning.rs
// PreferenceStore: the learning feedback loop over affinity and distance
// state. Thin async wrapper around the atomic upserts in db::learning.

use std::sync::Arc;

use timebank_types::{CategoryAffinity, DistancePreference, MatchAction};

use crate::config::LearningConfig;
use crate::db::{DatabasePool, learning};
use crate::error::Result;

/// Durable, bounded personalization state per user.
pub struct PreferenceStore {
    pool: Arc<DatabasePool>,
}

impl PreferenceStore {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    /// Record one interaction's learning signals: category affinity always,
    /// distance buckets only for positive-intent actions with a known
    /// distance. Both updates are single-statement upserts, safe under
    /// concurrent double-clicks.
    pub async fn record_interaction(
        &self,
        tenant_id: i64,
        user_id: i64,
        category_id: Option<i64>,
        distance_km: Option<f64>,
        action: MatchAction,
        config: &LearningConfig,
    ) -> Result<()> {
        let config = config.clone();
        self.pool
            .run_with_retry(move |conn| {
                if let Some(category) = category_id {
                    learning::record_affinity_sync(
                        conn, tenant_id, user_id, category, action, &config,
                    )?;
                }
                if action.is_positive()
                    && let Some(distance) = distance_km
                {
                    learning::record_distance_sync(conn, tenant_id, user_id, distance, &config)?;
                }
                Ok::<_, anyhow::Error>(())
            })
            .await
    }

    /// Combined historical boost for a candidate, clamped per config.
    pub async fn historical_boost(
        &self,
        user_id: i64,
        category_id: Option<i64>,
        distance_km: Option<f64>,
        config: &LearningConfig,
    ) -> Result<f64> {
        let config = config.clone();
        self.pool
            .run(move |conn| {
                learning::historical_boost_sync(conn, user_id, category_id, distance_km, &config)
            })
            .await
    }

    /// Learned affinity for a (user, category), if any interaction exists.
    pub async fn affinity(
        &self,
        user_id: i64,
        category_id: i64,
    ) -> Result<Option<CategoryAffinity>> {
        self.pool
            .run(move |conn| learning::get_affinity_sync(conn, user_id, category_id))
            .await
    }

    /// Learned distance preference for a user, if any exists.
    pub async fn distance_preference(&self, user_id: i64) -> Result<Option<DistancePreference>> {
        self.pool
            .run(move |conn| learning::get_distance_preference_sync(conn, user_id))
            .await
    }

    /// Hard-delete all learned state for a user (privacy/testing).
    pub async fn reset_user_learning(&self, user_id: i64) -> Result<()> {
        self.pool
            .run(move |conn| learning::reset_user_learning_sync(conn, user_id))
            .await
    }
}
