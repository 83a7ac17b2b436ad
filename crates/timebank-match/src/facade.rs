// crates/timebank-match/src/facade.rs
// MatchingFacade: the engine's public surface.
//
// Read APIs derive from the scoring engine and the cache; the only side
// effect of a read is cache population. Writes (interactions, conversions)
// are transactional across cache, history and learning state.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use timebank_types::{
    InteractionMetadata, MatchAction, MatchPreferences, MatchResult, MatchStatus, MatchType,
};
use tracing::{debug, info, warn};

use crate::config::MatchConfig;
use crate::db::{DatabasePool, cache, history, learning, preferences};
use crate::error::{MatchError, Result};
use crate::scoring::{ScoringEngine, ScoringRequest};
use crate::sources::{ListingSource, MatchNotifier, UserSource};

/// Per-call overrides for a match query. Unset fields fall back to the
/// user's stored preferences, then the tenant config.
#[derive(Debug, Clone, Default)]
pub struct MatchOptions {
    pub limit: Option<usize>,
    pub max_distance_km: Option<f64>,
    pub min_score: Option<f64>,
    pub categories: Option<Vec<i64>>,
}

const DEFAULT_LIMIT: usize = 20;

/// Orchestrates scoring, caching, the interaction ledger and the learning
/// loop for one tenant-resolved configuration.
pub struct MatchingFacade {
    pool: Arc<DatabasePool>,
    listings: Arc<dyn ListingSource>,
    notifier: Arc<dyn MatchNotifier>,
    engine: ScoringEngine,
    config: MatchConfig,
}

impl MatchingFacade {
    pub fn new(
        pool: Arc<DatabasePool>,
        listings: Arc<dyn ListingSource>,
        users: Arc<dyn UserSource>,
        notifier: Arc<dyn MatchNotifier>,
        config: MatchConfig,
    ) -> Self {
        let engine = ScoringEngine::new(pool.clone(), listings.clone(), users);
        Self {
            pool,
            listings,
            notifier,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    // =========================================================================
    // READ APIS
    // =========================================================================

    /// Ranked matches for a user. Scoring failures are answered by the
    /// legacy fallback matcher; the caller always gets a (possibly empty)
    /// list, never an error from the scoring path itself.
    pub async fn find_matches(
        &self,
        tenant_id: i64,
        user_id: i64,
        options: &MatchOptions,
    ) -> Result<Vec<MatchResult>> {
        if !self.config.enabled {
            debug!(tenant_id, "Matching disabled for tenant");
            return Ok(Vec::new());
        }
        let request = self.resolve_request(tenant_id, user_id, options).await?;

        match self
            .engine
            .find_matches(tenant_id, user_id, &request, &self.config, Utc::now())
            .await
        {
            Ok(matches) => {
                self.cache_results(tenant_id, user_id, &matches).await;
                Ok(matches)
            }
            Err(e) => {
                warn!(tenant_id, user_id, error = %e, "Scoring failed, using legacy matcher");
                Ok(self.legacy_matches(tenant_id, user_id, request.limit).await)
            }
        }
    }

    /// Suggestions with default options; scores and populates the cache.
    pub async fn get_suggestions_for_user(
        &self,
        tenant_id: i64,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchResult>> {
        self.find_matches(
            tenant_id,
            user_id,
            &MatchOptions {
                limit: Some(limit),
                ..MatchOptions::default()
            },
        )
        .await
    }

    /// High-score matches within the hot-match radius.
    pub async fn get_hot_matches(
        &self,
        tenant_id: i64,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchResult>> {
        let options = MatchOptions {
            limit: Some(limit),
            max_distance_km: Some(self.config.hot_match_distance_km),
            min_score: Some(self.config.hot_match_threshold),
            categories: None,
        };
        let matches = self.find_matches(tenant_id, user_id, &options).await?;
        Ok(matches
            .into_iter()
            .filter(|m| {
                m.score >= self.config.hot_match_threshold
                    && m.distance_km
                        .is_some_and(|d| d <= self.config.hot_match_distance_km)
            })
            .collect())
    }

    /// Matches where both parties' listings satisfy each other.
    pub async fn get_mutual_matches(
        &self,
        tenant_id: i64,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchResult>> {
        // Score a wider pool, then keep the mutual ones.
        let options = MatchOptions {
            limit: Some(50),
            ..MatchOptions::default()
        };
        let mut mutual: Vec<MatchResult> = self
            .find_matches(tenant_id, user_id, &options)
            .await?
            .into_iter()
            .filter(|m| m.match_type == MatchType::Mutual)
            .collect();
        mutual.truncate(limit);
        Ok(mutual)
    }

    /// Previously computed matches of a given type, straight from the
    /// cache. No scoring happens here.
    pub async fn get_matches_by_type(
        &self,
        tenant_id: i64,
        user_id: i64,
        match_type: MatchType,
        limit: usize,
    ) -> Result<Vec<cache::CachedMatch>> {
        self.pool
            .run(move |conn| {
                cache::get_matches_sync(conn, tenant_id, user_id, Some(match_type), limit)
            })
            .await
    }

    // =========================================================================
    // INTERACTIONS
    // =========================================================================

    /// Record a user interaction with a match.
    ///
    /// Three stores move together in one transaction: the cache entry's
    /// status advances along its lattice, the history ledger gets an
    /// immutable row, and the learning state absorbs the signal. Any
    /// failure rolls all of them back.
    pub async fn record_interaction(
        &self,
        tenant_id: i64,
        user_id: i64,
        listing_id: i64,
        action: &str,
        metadata: InteractionMetadata,
    ) -> Result<()> {
        let action = MatchAction::parse(action)
            .filter(|a| *a != MatchAction::Notified)
            .ok_or_else(|| MatchError::InvalidAction(action.to_string()))?;

        let learning_config = self.config.learning.clone();
        self.pool
            .run_with_retry(move |conn| {
                let tx = conn.unchecked_transaction()?;

                if let Some(status) = action.cache_status() {
                    cache::advance_status_sync(&tx, tenant_id, user_id, listing_id, status)?;
                }

                history::append_event_sync(&tx, tenant_id, user_id, listing_id, action, &metadata)?;

                if let Some(category) = metadata.category_id {
                    learning::record_affinity_sync(
                        &tx,
                        tenant_id,
                        user_id,
                        category,
                        action,
                        &learning_config,
                    )?;
                }
                if action.is_positive()
                    && let Some(distance) = metadata.distance_km
                {
                    learning::record_distance_sync(
                        &tx,
                        tenant_id,
                        user_id,
                        distance,
                        &learning_config,
                    )?;
                }

                tx.commit()?;
                Ok::<_, anyhow::Error>(())
            })
            .await?;

        debug!(tenant_id, user_id, listing_id, action = action.as_str(), "Recorded interaction");
        Ok(())
    }

    /// Attribute a completed transaction to the most recent qualifying
    /// interaction for the pair. Reports NotFound when no prior interaction
    /// exists - a conversion is never fabricated.
    pub async fn mark_conversion(
        &self,
        tenant_id: i64,
        user_id: i64,
        listing_id: i64,
        transaction_id: i64,
    ) -> Result<()> {
        let converted = self
            .pool
            .run_with_retry(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let converted = history::mark_conversion_sync(
                    &tx,
                    tenant_id,
                    user_id,
                    listing_id,
                    transaction_id,
                )?;
                if converted {
                    cache::advance_status_sync(
                        &tx,
                        tenant_id,
                        user_id,
                        listing_id,
                        MatchStatus::Completed,
                    )?;
                }
                tx.commit()?;
                Ok::<_, anyhow::Error>(converted)
            })
            .await?;

        if !converted {
            return Err(MatchError::NotFound(format!(
                "no prior interaction for user {user_id} and listing {listing_id}"
            )));
        }

        info!(tenant_id, user_id, listing_id, transaction_id, "Conversion recorded");
        Ok(())
    }

    // =========================================================================
    // PREFERENCES
    // =========================================================================

    /// A user's match preferences, with tenant defaults applied.
    pub async fn get_preferences(&self, tenant_id: i64, user_id: i64) -> Result<MatchPreferences> {
        let config = self.config.clone();
        self.pool
            .run(move |conn| preferences::get_preferences_sync(conn, tenant_id, user_id, &config))
            .await
    }

    /// Save a user's match preferences. Cached matches for the user are
    /// invalidated since the change affects their ranking.
    pub async fn save_preferences(
        &self,
        tenant_id: i64,
        user_id: i64,
        prefs: MatchPreferences,
    ) -> Result<()> {
        self.pool
            .run_with_retry(move |conn| {
                let tx = conn.unchecked_transaction()?;
                preferences::save_preferences_sync(&tx, tenant_id, user_id, &prefs)?;
                learning::set_stated_distance_sync(&tx, tenant_id, user_id, prefs.max_distance_km)?;
                cache::invalidate_user_sync(&tx, tenant_id, user_id)?;
                tx.commit()?;
                Ok::<_, anyhow::Error>(())
            })
            .await
    }

    /// Hard-delete a user's learned affinity and distance state.
    pub async fn reset_user_learning(&self, user_id: i64) -> Result<()> {
        self.pool
            .run(move |conn| learning::reset_user_learning_sync(conn, user_id))
            .await
    }

    // =========================================================================
    // CACHE MAINTENANCE
    // =========================================================================

    /// Drop cached matches for a user (listings or preferences changed).
    pub async fn invalidate_cache_for_user(&self, tenant_id: i64, user_id: i64) -> Result<usize> {
        self.pool
            .run(move |conn| cache::invalidate_user_sync(conn, tenant_id, user_id))
            .await
    }

    /// Drop cached matches touching a category (a listing there changed).
    pub async fn invalidate_cache_for_category(
        &self,
        tenant_id: i64,
        category_id: i64,
    ) -> Result<usize> {
        let ids = self
            .listings
            .listing_ids_in_category(tenant_id, category_id)
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.pool
            .run(move |conn| cache::invalidate_listings_sync(conn, tenant_id, &ids))
            .await
    }

    /// Remove expired cache entries. Intended for a periodic job.
    pub async fn clear_expired_cache(&self) -> Result<usize> {
        self.pool.run(cache::clear_expired_sync).await
    }

    // =========================================================================
    // NOTIFICATION SWEEP
    // =========================================================================

    /// Scan listings created in the last hour and push hot matches to
    /// interested users. Notification delivery is best-effort: a failing
    /// notifier is logged and skipped, never propagated.
    ///
    /// Returns the number of notifications handed to the notifier.
    pub async fn notify_new_matches(&self, tenant_id: i64) -> Result<usize> {
        let since = Utc::now() - Duration::hours(1);
        let recent = self.listings.recent_listings(tenant_id, since).await?;
        if recent.is_empty() {
            return Ok(0);
        }

        let mut notified = 0;
        for listing in recent {
            let listing_id = listing.id;
            let already = self
                .pool
                .try_interact("notify sweep dedup", move |conn| {
                    history::listing_notified_within_sync(conn, tenant_id, listing_id, 1)
                })
                .await
                .unwrap_or(false);
            if already {
                continue;
            }
            let Some(category_id) = listing.category_id else {
                continue;
            };

            // Users holding complementary listings in the same category are
            // the candidates for this push.
            let holders = self
                .listings
                .candidate_listings(
                    tenant_id,
                    listing.listing_type.complement(),
                    listing.owner_id,
                    Some(&[category_id]),
                    20,
                )
                .await?;
            let owners: BTreeSet<i64> = holders.iter().map(|l| l.owner_id).collect();

            for user_id in owners {
                let prefs = self.get_preferences(tenant_id, user_id).await?;
                if !prefs.notify_hot_matches || prefs.notification_frequency == "never" {
                    continue;
                }

                let recently = self
                    .pool
                    .try_interact("notify user dedup", move |conn| {
                        cache::recently_notified_sync(conn, tenant_id, user_id, listing_id, 7)
                    })
                    .await
                    .unwrap_or(false);
                if recently {
                    continue;
                }

                let options = MatchOptions {
                    limit: Some(10),
                    min_score: Some(self.config.notify_score_threshold),
                    ..MatchOptions::default()
                };
                let matches = self.find_matches(tenant_id, user_id, &options).await?;
                let Some(hit) = matches.iter().find(|m| {
                    m.listing.id == listing_id && m.score >= self.config.notify_score_threshold
                }) else {
                    continue;
                };

                if let Err(e) = self.notifier.hot_match(tenant_id, user_id, hit).await {
                    warn!(tenant_id, user_id, listing_id, error = %e, "Hot match notification failed");
                    continue;
                }

                let score = hit.score;
                self.pool
                    .try_interact("record notified", move |conn| {
                        history::append_event_sync(
                            conn,
                            tenant_id,
                            user_id,
                            listing_id,
                            MatchAction::Notified,
                            &InteractionMetadata {
                                category_id: Some(category_id),
                                distance_km: None,
                                match_score: Some(score),
                            },
                        )
                    })
                    .await;
                notified += 1;
            }
        }

        if notified > 0 {
            info!(tenant_id, notified, "Hot match sweep complete");
        }
        Ok(notified)
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Merge per-call overrides, stored preferences and tenant config into
    /// a resolved scoring request.
    async fn resolve_request(
        &self,
        tenant_id: i64,
        user_id: i64,
        options: &MatchOptions,
    ) -> Result<ScoringRequest> {
        let prefs = self.get_preferences(tenant_id, user_id).await?;
        Ok(ScoringRequest {
            limit: options.limit.unwrap_or(DEFAULT_LIMIT),
            max_distance_km: options.max_distance_km.unwrap_or(prefs.max_distance_km),
            min_score: options.min_score.unwrap_or(prefs.min_match_score),
            category_filter: options.categories.clone().or(prefs.categories),
        })
    }

    /// Write scored matches into the cache. Best-effort: a cache failure
    /// degrades future reads, not this one, so it is logged and swallowed.
    async fn cache_results(&self, tenant_id: i64, user_id: i64, matches: &[MatchResult]) {
        if matches.is_empty() {
            return;
        }
        let ttl_days = self.config.cache_ttl_days;
        let matches = matches.to_vec();
        self.pool
            .try_interact("cache match results", move |conn| {
                for result in &matches {
                    cache::upsert_match_sync(conn, tenant_id, user_id, result, ttl_days)?;
                }
                Ok(())
            })
            .await;
    }

    /// Legacy fallback matcher: same-category complementary listings at a
    /// fixed score, no distance weighting, no learning. Never errors - any
    /// internal failure yields an empty list.
    async fn legacy_matches(&self, tenant_id: i64, user_id: i64, limit: usize) -> Vec<MatchResult> {
        let attempt: Result<Vec<MatchResult>> = async {
            let my_listings = self
                .listings
                .active_listings_for_user(tenant_id, user_id)
                .await?;

            let mut results: Vec<MatchResult> = Vec::new();
            let mut seen = BTreeSet::new();

            for my_listing in &my_listings {
                let Some(category_id) = my_listing.category_id else {
                    continue;
                };
                let candidates = self
                    .listings
                    .candidate_listings(
                        tenant_id,
                        my_listing.listing_type.complement(),
                        user_id,
                        Some(&[category_id]),
                        limit,
                    )
                    .await?;

                for candidate in candidates {
                    if !seen.insert(candidate.id) {
                        continue;
                    }
                    results.push(MatchResult {
                        score: self.config.legacy_score,
                        match_type: MatchType::Legacy,
                        distance_km: None,
                        reasons: vec!["Same category match".to_string()],
                        breakdown: Vec::new(),
                        listing: candidate,
                    });
                }
            }

            results.sort_by(|a, b| {
                b.listing
                    .created_at
                    .cmp(&a.listing.created_at)
                    .then(a.listing.id.cmp(&b.listing.id))
            });
            results.truncate(limit);
            Ok(results)
        }
        .await;

        match attempt {
            Ok(results) => results,
            Err(e) => {
                warn!(tenant_id, user_id, error = %e, "Legacy matcher failed, returning empty");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixtures::{FailingUsers, RecordingNotifier, StaticListings, StaticUsers};
    use chrono::Duration;
    use timebank_types::{Listing, ListingType, UserProfile};

    fn listing(
        id: i64,
        owner: i64,
        listing_type: ListingType,
        category: i64,
        coords: Option<(f64, f64)>,
        age_hours: i64,
    ) -> Listing {
        Listing {
            id,
            tenant_id: 1,
            owner_id: owner,
            listing_type,
            title: format!("Listing {id}"),
            description: Some("Gardening, pruning and general landscaping work".to_string()),
            category_id: Some(category),
            category_name: Some("Gardening".to_string()),
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
            image_url: None,
            created_at: Utc::now() - Duration::hours(age_hours),
        }
    }

    fn profile(id: i64, coords: Option<(f64, f64)>) -> UserProfile {
        UserProfile {
            id,
            tenant_id: 1,
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
            skills: Some("gardening pruning".to_string()),
            is_verified: true,
            avg_rating: Some(4.5),
            transaction_count: 12,
        }
    }

    fn matched_pair() -> (Vec<Listing>, Vec<UserProfile>) {
        // The request was posted just now, so the notification sweep's
        // one-hour window always includes it.
        let listings = vec![
            listing(1, 100, ListingType::Offer, 4, Some((51.5074, -0.1278)), 2),
            listing(2, 200, ListingType::Request, 4, Some((51.5244, -0.0940)), 0),
        ];
        let profiles = vec![
            profile(100, Some((51.5074, -0.1278))),
            profile(200, Some((51.5244, -0.0940))),
        ];
        (listings, profiles)
    }

    async fn facade_with(
        listings: Vec<Listing>,
        profiles: Vec<UserProfile>,
    ) -> (MatchingFacade, Arc<DatabasePool>) {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let facade = MatchingFacade::new(
            pool.clone(),
            Arc::new(StaticListings::new(listings)),
            Arc::new(StaticUsers::new(profiles)),
            Arc::new(crate::sources::NullNotifier),
            MatchConfig::default(),
        );
        (facade, pool)
    }

    #[tokio::test]
    async fn suggestions_populate_the_cache() {
        let (listings, profiles) = matched_pair();
        let (facade, pool) = facade_with(listings, profiles).await;

        let matches = facade.get_suggestions_for_user(1, 100, 10).await.unwrap();
        assert_eq!(matches.len(), 1);

        let cached: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM match_cache", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(cached, 1);

        // Calling again is idempotent: same entry, same order
        let again = facade.get_suggestions_for_user(1, 100, 10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].listing.id, matches[0].listing.id);
    }

    #[tokio::test]
    async fn hot_matches_require_score_and_distance() {
        let (listings, profiles) = matched_pair();
        let (facade, _pool) = facade_with(listings, profiles).await;

        let hot = facade.get_hot_matches(1, 100, 5).await.unwrap();
        assert_eq!(hot.len(), 1);
        assert!(hot[0].score >= 80.0);
        assert!(hot[0].distance_km.unwrap() <= 15.0);
    }

    #[tokio::test]
    async fn record_interaction_moves_all_three_stores() {
        let (listings, profiles) = matched_pair();
        let (facade, pool) = facade_with(listings, profiles).await;

        facade
            .record_interaction(
                1,
                100,
                2,
                "saved",
                InteractionMetadata {
                    category_id: Some(4),
                    distance_km: Some(3.0),
                    match_score: Some(90.0),
                },
            )
            .await
            .unwrap();

        let (status, history_count, affinity_score, bucket): (String, i64, f64, i64) = pool
            .interact(|conn| {
                let status = conn.query_row(
                    "SELECT status FROM match_cache WHERE user_id = 100 AND listing_id = 2",
                    [],
                    |row| row.get(0),
                )?;
                let history =
                    conn.query_row("SELECT COUNT(*) FROM match_history", [], |row| row.get(0))?;
                let affinity = conn.query_row(
                    "SELECT affinity_score FROM user_category_affinity WHERE user_id = 100",
                    [],
                    |row| row.get(0),
                )?;
                let bucket = conn.query_row(
                    "SELECT km_2_to_5 FROM user_distance_preference WHERE user_id = 100",
                    [],
                    |row| row.get(0),
                )?;
                Ok((status, history, affinity, bucket))
            })
            .await
            .unwrap();

        assert_eq!(status, "saved");
        assert_eq!(history_count, 1);
        assert_eq!(affinity_score, 53.0);
        assert_eq!(bucket, 1);
    }

    #[tokio::test]
    async fn invalid_action_is_rejected_before_any_write() {
        let (listings, profiles) = matched_pair();
        let (facade, pool) = facade_with(listings, profiles).await;

        let err = facade
            .record_interaction(1, 100, 2, "poked", InteractionMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidAction(_)));

        // The internal notified action is not a user action either
        let err = facade
            .record_interaction(1, 100, 2, "notified", InteractionMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidAction(_)));

        let history_count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM match_history", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(history_count, 0);
    }

    #[tokio::test]
    async fn conversion_flow() {
        let (listings, profiles) = matched_pair();
        let (facade, pool) = facade_with(listings, profiles).await;

        facade
            .record_interaction(
                1,
                100,
                2,
                "contacted",
                InteractionMetadata {
                    category_id: Some(4),
                    distance_km: Some(3.0),
                    match_score: None,
                },
            )
            .await
            .unwrap();

        facade.mark_conversion(1, 100, 2, 777).await.unwrap();

        let (status, action, txn): (String, String, Option<i64>) = pool
            .interact(|conn| {
                let status = conn.query_row(
                    "SELECT status FROM match_cache WHERE user_id = 100 AND listing_id = 2",
                    [],
                    |row| row.get(0),
                )?;
                let (action, txn) = conn.query_row(
                    "SELECT action, transaction_id FROM match_history
                     WHERE user_id = 100 AND listing_id = 2",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok((status, action, txn))
            })
            .await
            .unwrap();

        assert_eq!(status, "completed");
        assert_eq!(action, "completed");
        assert_eq!(txn, Some(777));
    }

    #[tokio::test]
    async fn conversion_without_history_is_not_found() {
        let (listings, profiles) = matched_pair();
        let (facade, _pool) = facade_with(listings, profiles).await;

        let err = facade.mark_conversion(1, 100, 2, 777).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn dismissed_then_completed_ends_completed() {
        let (listings, profiles) = matched_pair();
        let (facade, pool) = facade_with(listings, profiles).await;

        let meta = InteractionMetadata {
            category_id: Some(4),
            distance_km: Some(3.0),
            match_score: None,
        };
        facade
            .record_interaction(1, 100, 2, "dismissed", meta.clone())
            .await
            .unwrap();
        facade
            .record_interaction(1, 100, 2, "completed", meta.clone())
            .await
            .unwrap();
        // A stale viewed arriving afterwards must not regress it
        facade
            .record_interaction(1, 100, 2, "viewed", meta)
            .await
            .unwrap();

        let status: String = pool
            .interact(|conn| {
                conn.query_row(
                    "SELECT status FROM match_cache WHERE user_id = 100 AND listing_id = 2",
                    [],
                    |row| row.get(0),
                )
                .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(status, "completed");
    }

    #[tokio::test]
    async fn scoring_failure_falls_back_to_legacy() {
        let listings = vec![
            listing(1, 100, ListingType::Offer, 4, None, 2),
            listing(2, 200, ListingType::Request, 4, None, 1),
        ];
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let facade = MatchingFacade::new(
            pool.clone(),
            Arc::new(StaticListings::new(listings)),
            Arc::new(FailingUsers),
            Arc::new(crate::sources::NullNotifier),
            MatchConfig::default(),
        );

        let matches = facade.find_matches(1, 100, &MatchOptions::default()).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_type, MatchType::Legacy);
        assert_eq!(matches[0].score, 60.0);
        assert_eq!(matches[0].distance_km, None);
    }

    #[tokio::test]
    async fn save_preferences_invalidates_cache() {
        let (listings, profiles) = matched_pair();
        let (facade, pool) = facade_with(listings, profiles).await;

        facade.get_suggestions_for_user(1, 100, 10).await.unwrap();
        facade
            .save_preferences(
                1,
                100,
                MatchPreferences {
                    max_distance_km: 10.0,
                    ..MatchPreferences::default()
                },
            )
            .await
            .unwrap();

        let cached: i64 = pool
            .interact(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM match_cache WHERE user_id = 100",
                    [],
                    |row| row.get(0),
                )
                .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(cached, 0);

        let prefs = facade.get_preferences(1, 100).await.unwrap();
        assert_eq!(prefs.max_distance_km, 10.0);
    }

    #[tokio::test]
    async fn notification_sweep_pushes_hot_matches_once() {
        // Listing 2 was just posted by user 200; user 100 holds the
        // complementary offer 3 km away.
        let (listings, profiles) = matched_pair();
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let facade = MatchingFacade::new(
            pool.clone(),
            Arc::new(StaticListings::new(listings)),
            Arc::new(StaticUsers::new(profiles)),
            notifier.clone(),
            MatchConfig::default(),
        );

        let notified = facade.notify_new_matches(1).await.unwrap();
        assert_eq!(notified, 1);
        assert_eq!(
            notifier.deliveries.lock().unwrap().as_slice(),
            &[(1, 100, 2)]
        );

        // Second sweep within the window is a no-op
        let notified = facade.notify_new_matches(1).await.unwrap();
        assert_eq!(notified, 0);
    }

    #[tokio::test]
    async fn sweep_respects_opt_out() {
        let (listings, profiles) = matched_pair();
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let facade = MatchingFacade::new(
            pool.clone(),
            Arc::new(StaticListings::new(listings)),
            Arc::new(StaticUsers::new(profiles)),
            notifier.clone(),
            MatchConfig::default(),
        );

        facade
            .save_preferences(
                1,
                100,
                MatchPreferences {
                    notify_hot_matches: false,
                    ..MatchPreferences::default()
                },
            )
            .await
            .unwrap();

        let notified = facade.notify_new_matches(1).await.unwrap();
        assert_eq!(notified, 0);
        assert!(notifier.deliveries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_invalidation_by_category() {
        let (listings, profiles) = matched_pair();
        let (facade, pool) = facade_with(listings, profiles).await;

        facade.get_suggestions_for_user(1, 100, 10).await.unwrap();
        let dropped = facade.invalidate_cache_for_category(1, 4).await.unwrap();
        assert_eq!(dropped, 1);

        let remaining: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM match_cache", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
