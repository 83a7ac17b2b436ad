// crates/timebank-match/src/config.rs
// Tenant-scoped matching configuration
//
// Resolved once per tenant by the caller (typically from the tenant's
// configuration JSON) and passed by reference into the engine. There is no
// process-wide config state.

use serde::Deserialize;
use tracing::{debug, warn};

/// Scoring component weights. Should sum to 1.0; the engine normalizes at
/// score time so a slightly off tenant override cannot push scores past 100.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub category: f64,
    pub skill: f64,
    pub proximity: f64,
    pub freshness: f64,
    pub reciprocity: f64,
    pub quality: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            category: 0.25,
            skill: 0.20,
            proximity: 0.25,
            freshness: 0.10,
            reciprocity: 0.15,
            quality: 0.05,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.category + self.skill + self.proximity + self.freshness + self.reciprocity
            + self.quality
    }
}

/// Geographic decay parameters for the proximity component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Full score within this radius (walking distance).
    pub full_radius_km: f64,
    /// Linear score loss per km beyond the full radius.
    pub decay_per_km: f64,
    /// Score floor for far-away candidates.
    pub min_score: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            full_radius_km: 5.0,
            decay_per_km: 0.01,
            min_score: 0.05,
        }
    }
}

/// Listing-age decay parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    pub full_hours: f64,
    pub half_life_hours: f64,
    pub minimum: f64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            full_hours: 24.0,
            // 14-day half-life
            half_life_hours: 336.0,
            minimum: 0.3,
        }
    }
}

/// Learned-preference boost tuning. These are empirically tuned constants
/// carried from production; only their bounds are contractual.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Affinity boost is (affinity - 50) / divisor, clamped to ±affinity_clamp.
    pub affinity_divisor: f64,
    pub affinity_clamp: f64,
    /// Distance boost tiers relative to learned max: within 50%, within
    /// 100%, within 150%, beyond.
    pub distance_tiers: [f64; 4],
    /// Total boost clamp.
    pub boost_clamp: f64,
    /// Affinity moves by weight × this per interaction.
    pub affinity_step: f64,
    /// New affinity rows seed at 50 + weight × this.
    pub affinity_seed_step: f64,
    /// Learned max distance = multiplier × weighted mean bucket midpoint.
    pub learned_distance_multiplier: f64,
    /// Bucketed interactions required before a learned max exists.
    pub min_interactions: i64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            affinity_divisor: 10.0,
            affinity_clamp: 5.0,
            distance_tiers: [3.0, 1.0, -1.0, -3.0],
            boost_clamp: 10.0,
            affinity_step: 2.0,
            affinity_seed_step: 10.0,
            learned_distance_multiplier: 1.5,
            min_interactions: 5,
        }
    }
}

/// Resolved matching configuration for one tenant.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub enabled: bool,
    pub max_distance_km: f64,
    pub min_match_score: f64,
    pub hot_match_threshold: f64,
    pub hot_match_distance_km: f64,
    /// Score required before the sweep emits a hot-match notification.
    pub notify_score_threshold: f64,
    /// Fixed score assigned by the legacy fallback matcher.
    pub legacy_score: f64,
    /// Neutral score for cold-start suggestions.
    pub cold_start_score: f64,
    /// Candidate pool cap per seeker listing.
    pub candidate_limit: usize,
    /// Cache entries expire after this many days.
    pub cache_ttl_days: i64,
    pub weights: ScoreWeights,
    pub proximity: ProximityConfig,
    pub freshness: FreshnessConfig,
    pub learning: LearningConfig,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_distance_km: 50.0,
            min_match_score: 40.0,
            hot_match_threshold: 80.0,
            hot_match_distance_km: 15.0,
            notify_score_threshold: 85.0,
            legacy_score: 60.0,
            cold_start_score: 50.0,
            candidate_limit: 50,
            cache_ttl_days: 7,
            weights: ScoreWeights::default(),
            proximity: ProximityConfig::default(),
            freshness: FreshnessConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl MatchConfig {
    /// Resolve config from a tenant's configuration JSON blob, looking under
    /// `algorithms.matching`. Missing or malformed sections fall back to
    /// defaults; a tenant can never break matching with a bad override.
    pub fn from_tenant_json(tenant_config: &serde_json::Value) -> Self {
        let section = tenant_config
            .get("algorithms")
            .and_then(|a| a.get("matching"));

        match section {
            Some(value) => match serde_json::from_value::<MatchConfig>(value.clone()) {
                Ok(config) => {
                    debug!("Loaded tenant matching config");
                    config
                }
                Err(e) => {
                    warn!(error = %e, "Failed to parse tenant matching config, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let weights = ScoreWeights::default();
        assert!((weights.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn from_tenant_json_with_overrides() {
        let value = serde_json::json!({
            "algorithms": {
                "matching": {
                    "max_distance_km": 25.0,
                    "hot_match_threshold": 75.0
                }
            }
        });
        let config = MatchConfig::from_tenant_json(&value);
        assert_eq!(config.max_distance_km, 25.0);
        assert_eq!(config.hot_match_threshold, 75.0);
        // Untouched fields keep defaults
        assert_eq!(config.min_match_score, 40.0);
        assert_eq!(config.weights.category, 0.25);
    }

    #[test]
    fn from_tenant_json_missing_section_uses_defaults() {
        let value = serde_json::json!({ "branding": { "color": "#fff" } });
        let config = MatchConfig::from_tenant_json(&value);
        assert_eq!(config.max_distance_km, 50.0);
        assert!(config.enabled);
    }

    #[test]
    fn from_tenant_json_malformed_section_uses_defaults() {
        let value = serde_json::json!({
            "algorithms": { "matching": { "max_distance_km": "not a number" } }
        });
        let config = MatchConfig::from_tenant_json(&value);
        assert_eq!(config.max_distance_km, 50.0);
    }

    #[test]
    fn learned_distance_defaults() {
        let learning = LearningConfig::default();
        assert_eq!(learning.min_interactions, 5);
        assert_eq!(learning.learned_distance_multiplier, 1.5);
        assert_eq!(learning.distance_tiers, [3.0, 1.0, -1.0, -3.0]);
    }
}
