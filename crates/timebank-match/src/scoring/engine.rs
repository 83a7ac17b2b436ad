// scoring/engine.rs
// Candidate scoring: combines category, skill, proximity, freshness,
// reciprocity and quality signals into a 0-100 score, then applies the
// learned per-user boost.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use timebank_types::{Listing, ListingType, MatchResult, MatchType, UserProfile};
use tracing::debug;

use crate::config::MatchConfig;
use crate::db::{DatabasePool, learning};
use crate::error::Result;
use crate::scoring::{freshness, geo, keywords, quality};
use crate::sources::{ListingSource, UserSource};

/// Resolved scoring parameters for one request. The facade merges tenant
/// config, stored user preferences and per-call overrides into this.
#[derive(Debug, Clone)]
pub struct ScoringRequest {
    pub limit: usize,
    pub max_distance_km: f64,
    pub min_score: f64,
    pub category_filter: Option<Vec<i64>>,
}

/// Per-component scores in [0, 1] before weighting.
#[derive(Debug, Clone, Copy, Default)]
struct ComponentScores {
    category: f64,
    skill: f64,
    proximity: f64,
    freshness: f64,
    reciprocity: f64,
    quality: f64,
}

impl ComponentScores {
    /// Weighted combination scaled to 0-100. Weights are normalized by
    /// their sum so a skewed tenant override cannot push past 100.
    fn weighted_total(&self, config: &MatchConfig) -> f64 {
        let w = &config.weights;
        let total_weight = w.total();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let sum = self.category * w.category
            + self.skill * w.skill
            + self.proximity * w.proximity
            + self.freshness * w.freshness
            + self.reciprocity * w.reciprocity
            + self.quality * w.quality;
        sum / total_weight * 100.0
    }

    fn breakdown(&self) -> Vec<(String, f64)> {
        vec![
            ("category".to_string(), self.category),
            ("skill".to_string(), self.skill),
            ("proximity".to_string(), self.proximity),
            ("freshness".to_string(), self.freshness),
            ("reciprocity".to_string(), self.reciprocity),
            ("quality".to_string(), self.quality),
        ]
    }
}

/// Cross-satisfaction between two users' listing pools.
///
/// Returns the reciprocity component and whether the categories line up in
/// both directions (the precondition for a mutual match).
fn reciprocity(seeker_listings: &[Listing], candidate_listings: &[Listing]) -> (f64, bool) {
    if candidate_listings.is_empty() {
        return (0.3, false);
    }

    let categories = |listings: &[Listing], listing_type: ListingType| -> HashSet<i64> {
        listings
            .iter()
            .filter(|l| l.listing_type == listing_type)
            .filter_map(|l| l.category_id)
            .collect()
    };

    let seeker_offers = categories(seeker_listings, ListingType::Offer);
    let seeker_requests = categories(seeker_listings, ListingType::Request);
    let candidate_offers = categories(candidate_listings, ListingType::Offer);
    let candidate_requests = categories(candidate_listings, ListingType::Request);

    let they_need_ours = seeker_offers.intersection(&candidate_requests).count() > 0;
    let we_need_theirs = candidate_offers.intersection(&seeker_requests).count() > 0;

    match (they_need_ours, we_need_theirs) {
        (true, true) => (1.0, true),
        (true, false) | (false, true) => (0.7, false),
        (false, false) => (0.4, false),
    }
}

/// The reverse pairing for a mutual check: one of the candidate owner's
/// listings that satisfies one of the seeker's, excluding the forward
/// direction already being scored.
fn reverse_pairing<'a>(
    my_listing: &Listing,
    candidate: &Listing,
    seeker_listings: &'a [Listing],
    candidate_listings: &'a [Listing],
) -> Option<(&'a Listing, &'a Listing)> {
    candidate_listings
        .iter()
        .filter(|their| their.listing_type == my_listing.listing_type && their.id != candidate.id)
        .find_map(|their| {
            seeker_listings
                .iter()
                .filter(|ours| ours.listing_type == candidate.listing_type)
                .find(|ours| ours.category_id.is_some() && ours.category_id == their.category_id)
                .map(|ours| (their, ours))
        })
}

/// Scores candidate listings for a seeker. Stateless between calls; all
/// inputs come from the read models, the learning store and the clock.
pub struct ScoringEngine {
    pool: Arc<DatabasePool>,
    listings: Arc<dyn ListingSource>,
    users: Arc<dyn UserSource>,
}

impl ScoringEngine {
    pub fn new(
        pool: Arc<DatabasePool>,
        listings: Arc<dyn ListingSource>,
        users: Arc<dyn UserSource>,
    ) -> Self {
        Self {
            pool,
            listings,
            users,
        }
    }

    /// Find and rank matches for a user.
    ///
    /// Errors are returned as values; the facade decides whether to fall
    /// back to the legacy matcher.
    pub async fn find_matches(
        &self,
        tenant_id: i64,
        user_id: i64,
        request: &ScoringRequest,
        config: &MatchConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<MatchResult>> {
        let Some(seeker) = self.users.profile(tenant_id, user_id).await? else {
            debug!(user_id, "No profile for seeker, returning no matches");
            return Ok(Vec::new());
        };

        let seeker_listings = self
            .listings
            .active_listings_for_user(tenant_id, user_id)
            .await?;

        if seeker_listings.is_empty() {
            return self.cold_start(tenant_id, &seeker, request, config).await;
        }

        let mut seeker_keywords = keywords::extract_keywords(seeker.skills.as_deref().unwrap_or(""));
        for listing in &seeker_listings {
            seeker_keywords.extend(keywords::extract_keywords(&listing_text(listing)));
        }

        let mut matches: Vec<MatchResult> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();

        for my_listing in &seeker_listings {
            let target_type = my_listing.listing_type.complement();
            let category_filter: Option<Vec<i64>> = my_listing
                .category_id
                .map(|id| vec![id])
                .or_else(|| request.category_filter.clone());

            let candidates = self
                .listings
                .candidate_listings(
                    tenant_id,
                    target_type,
                    user_id,
                    category_filter.as_deref(),
                    config.candidate_limit,
                )
                .await?;

            for candidate in candidates {
                if !seen.insert(candidate.id) {
                    continue;
                }

                let scored = self
                    .score_candidate(
                        tenant_id,
                        &seeker,
                        &seeker_keywords,
                        &seeker_listings,
                        my_listing,
                        &candidate,
                        request,
                        config,
                        now,
                    )
                    .await?;

                let Some(result) = scored else { continue };
                matches.push(result);
            }
        }

        sort_matches(&mut matches);
        matches.truncate(request.limit);
        Ok(matches)
    }

    /// Score one candidate against one of the seeker's listings. Returns
    /// None when the candidate is excluded by distance or score threshold.
    #[allow(clippy::too_many_arguments)]
    async fn score_candidate(
        &self,
        tenant_id: i64,
        seeker: &UserProfile,
        seeker_keywords: &HashSet<String>,
        seeker_listings: &[Listing],
        my_listing: &Listing,
        candidate: &Listing,
        request: &ScoringRequest,
        config: &MatchConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchResult>> {
        let distance = geo::distance_between(seeker.coordinates(), candidate.coordinates());

        // Distance cutoff applies only when both locations are known.
        if let Some(d) = distance
            && d > request.max_distance_km
        {
            return Ok(None);
        }

        let owner = self.users.profile(tenant_id, candidate.owner_id).await?;
        let candidate_listings = self
            .listings
            .active_listings_for_user(tenant_id, candidate.owner_id)
            .await?;

        let (reciprocity_score, category_mutual) = reciprocity(seeker_listings, &candidate_listings);

        let scores = ComponentScores {
            category: category_score(my_listing, candidate),
            skill: keywords::skill_score(seeker_keywords, &listing_text(candidate)),
            proximity: geo::geo_score_opt(distance, &config.proximity),
            freshness: freshness::freshness_score(candidate.created_at, now, &config.freshness),
            reciprocity: reciprocity_score,
            quality: quality::quality_score(candidate, owner.as_ref()),
        };

        let base_score = scores.weighted_total(config);

        let boost = {
            let user_id = seeker.id;
            let category_id = candidate.category_id;
            let learning = config.learning.clone();
            self.pool
                .interact(move |conn| {
                    learning::historical_boost_sync(conn, user_id, category_id, distance, &learning)
                })
                .await?
        };

        let final_score = (base_score + boost).clamp(0.0, 100.0);
        if final_score < request.min_score {
            return Ok(None);
        }

        // Mutual check: one level of reciprocity only. The reverse pairing
        // is scored from data already in hand, without boost and without
        // another reciprocal check, so there is no recursion.
        let mut match_type = MatchType::Standard;
        if category_mutual
            && let Some((their_listing, our_listing)) =
                reverse_pairing(my_listing, candidate, seeker_listings, &candidate_listings)
            && let Some(owner_profile) = owner.as_ref()
        {
            let owner_keywords =
                keywords::extract_keywords(owner_profile.skills.as_deref().unwrap_or(""));
            let reverse_distance =
                geo::distance_between(owner_profile.coordinates(), our_listing.coordinates().or(seeker.coordinates()));
            let reverse = ComponentScores {
                category: category_score(their_listing, our_listing),
                skill: keywords::skill_score(&owner_keywords, &listing_text(our_listing)),
                proximity: geo::geo_score_opt(reverse_distance, &config.proximity),
                freshness: freshness::freshness_score(our_listing.created_at, now, &config.freshness),
                reciprocity: reciprocity(&candidate_listings, seeker_listings).0,
                quality: quality::quality_score(our_listing, Some(seeker)),
            };
            if reverse.weighted_total(config) >= request.min_score {
                match_type = MatchType::Mutual;
            }
        }

        if match_type == MatchType::Standard
            && final_score >= config.hot_match_threshold
            && distance.is_some_and(|d| d <= config.hot_match_distance_km)
        {
            match_type = MatchType::Hot;
        }

        let mut reasons = Vec::new();
        if scores.category >= 0.8 {
            reasons.push(format!(
                "Same category: {}",
                candidate.category_name.as_deref().unwrap_or("General")
            ));
        }
        if scores.skill >= 0.5 {
            reasons.push("Skills match your expertise".to_string());
        }
        if let Some(d) = distance {
            if d <= config.proximity.full_radius_km {
                reasons.push(format!("Very close: {d:.1} km away"));
            } else if d <= config.hot_match_distance_km {
                reasons.push(format!("Nearby: {d:.1} km away"));
            }
        }
        if scores.freshness >= 0.9 {
            reasons.push("Posted recently".to_string());
        }
        if match_type == MatchType::Mutual {
            reasons.push("Mutual exchange possible".to_string());
        }
        if scores.quality >= 0.8 {
            reasons.push("Highly rated member".to_string());
        }
        if boost > 0.0 {
            reasons.push("Matches your preferences".to_string());
        }

        let mut breakdown = scores.breakdown();
        breakdown.push(("boost".to_string(), boost));

        Ok(Some(MatchResult {
            listing: candidate.clone(),
            score: (final_score * 10.0).round() / 10.0,
            match_type,
            distance_km: distance.map(|d| (d * 10.0).round() / 10.0),
            reasons,
            breakdown,
        }))
    }

    /// Suggestions for a seeker with no listings yet: nearby active
    /// listings of either type at a neutral score.
    async fn cold_start(
        &self,
        tenant_id: i64,
        seeker: &UserProfile,
        request: &ScoringRequest,
        config: &MatchConfig,
    ) -> Result<Vec<MatchResult>> {
        let mut pool = Vec::new();
        for listing_type in [ListingType::Offer, ListingType::Request] {
            pool.extend(
                self.listings
                    .candidate_listings(
                        tenant_id,
                        listing_type,
                        seeker.id,
                        None,
                        config.candidate_limit,
                    )
                    .await?,
            );
        }

        let mut results: Vec<MatchResult> = pool
            .into_iter()
            .filter_map(|listing| {
                let distance = geo::distance_between(seeker.coordinates(), listing.coordinates());
                if let Some(d) = distance
                    && d > request.max_distance_km
                {
                    return None;
                }
                Some(MatchResult {
                    score: config.cold_start_score,
                    match_type: MatchType::Standard,
                    distance_km: distance.map(|d| (d * 10.0).round() / 10.0),
                    reasons: vec!["Nearby listing that might interest you".to_string()],
                    breakdown: Vec::new(),
                    listing,
                })
            })
            .collect();

        // Closest first, unknown distances last, then recency.
        results.sort_by(|a, b| {
            match (a.distance_km, b.distance_km) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(b.listing.created_at.cmp(&a.listing.created_at))
            .then(a.listing.id.cmp(&b.listing.id))
        });
        results.truncate(request.limit);
        Ok(results)
    }
}

/// Title and description of a listing as one keyword-extraction input.
fn listing_text(listing: &Listing) -> String {
    match &listing.description {
        Some(description) => format!("{} {}", listing.title, description),
        None => listing.title.clone(),
    }
}

/// Category component: exact match or a flat base for cross-category pairs.
fn category_score(my_listing: &Listing, candidate: &Listing) -> f64 {
    match (my_listing.category_id, candidate.category_id) {
        (Some(mine), Some(theirs)) if mine == theirs => 1.0,
        _ => 0.3,
    }
}

/// Deterministic ranking: score desc, then recency, then id.
fn sort_matches(matches: &mut [MatchResult]) {
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.listing.created_at.cmp(&a.listing.created_at))
            .then(a.listing.id.cmp(&b.listing.id))
    });
}
