// crates/timebank-types/src/lib.rs
// Shared domain types for the timebank matching engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════
// LISTINGS (read model, owned externally)
// ═══════════════════════════════════════

/// Whether a listing offers a service or requests one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Offer,
    Request,
}

impl ListingType {
    /// The type a candidate listing must have to match this one.
    pub fn complement(self) -> Self {
        match self {
            Self::Offer => Self::Request,
            Self::Request => Self::Offer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Request => "request",
        }
    }
}

/// A user-posted offer or request, as consumed from the listings subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub tenant_id: i64,
    pub owner_id: i64,
    pub listing_type: ListingType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Coordinates as a pair, when both are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════
// USERS (read model, owned externally)
// ═══════════════════════════════════════

/// The subset of a user profile the scoring engine consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub tenant_id: i64,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Free-text skills, keyword-matched against candidate listings.
    #[serde(default)]
    pub skills: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub avg_rating: Option<f64>,
    #[serde(default)]
    pub transaction_count: i64,
}

impl UserProfile {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════
// MATCHES
// ═══════════════════════════════════════

/// Classification of a scored pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Standard,
    Hot,
    Mutual,
    Legacy,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Hot => "hot",
            Self::Mutual => "mutual",
            Self::Legacy => "legacy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Self::Standard),
            "hot" => Some(Self::Hot),
            "mutual" => Some(Self::Mutual),
            "legacy" => Some(Self::Legacy),
            _ => None,
        }
    }
}

/// Lifecycle of a cached match entry. Transitions are forward-only:
/// new → viewed → saved → contacted → dismissed → completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    New,
    Viewed,
    Saved,
    Contacted,
    Dismissed,
    Completed,
}

impl MatchStatus {
    /// Position in the status lattice. A status may only be replaced by one
    /// with a strictly higher rank, so `completed` is terminal and a stale
    /// `viewed` can never clobber a `completed`.
    pub fn rank(self) -> i64 {
        match self {
            Self::New => 0,
            Self::Viewed => 1,
            Self::Saved => 2,
            Self::Contacted => 3,
            Self::Dismissed => 4,
            Self::Completed => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Viewed => "viewed",
            Self::Saved => "saved",
            Self::Contacted => "contacted",
            Self::Dismissed => "dismissed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "viewed" => Some(Self::Viewed),
            "saved" => Some(Self::Saved),
            "contacted" => Some(Self::Contacted),
            "dismissed" => Some(Self::Dismissed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A user interaction with a suggested match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchAction {
    Viewed,
    Saved,
    Contacted,
    Completed,
    Dismissed,
    Reported,
    /// Recorded by the hot-match notification sweep for dedup.
    Notified,
}

impl MatchAction {
    /// Learning weight applied to category affinity.
    pub fn weight(self) -> f64 {
        match self {
            Self::Viewed => 0.1,
            Self::Saved => 0.3,
            Self::Contacted => 0.5,
            Self::Completed => 1.0,
            Self::Dismissed => -0.5,
            Self::Reported => -1.0,
            Self::Notified => 0.0,
        }
    }

    /// Positive-intent actions move the learned distance preference.
    pub fn is_positive(self) -> bool {
        matches!(
            self,
            Self::Viewed | Self::Saved | Self::Contacted | Self::Completed
        )
    }

    /// The cache status this action advances an entry towards, if any.
    pub fn cache_status(self) -> Option<MatchStatus> {
        match self {
            Self::Viewed => Some(MatchStatus::Viewed),
            Self::Saved => Some(MatchStatus::Saved),
            Self::Contacted => Some(MatchStatus::Contacted),
            Self::Completed => Some(MatchStatus::Completed),
            Self::Dismissed => Some(MatchStatus::Dismissed),
            Self::Reported | Self::Notified => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewed => "viewed",
            Self::Saved => "saved",
            Self::Contacted => "contacted",
            Self::Completed => "completed",
            Self::Dismissed => "dismissed",
            Self::Reported => "reported",
            Self::Notified => "notified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewed" => Some(Self::Viewed),
            "saved" => Some(Self::Saved),
            "contacted" => Some(Self::Contacted),
            "completed" => Some(Self::Completed),
            "dismissed" => Some(Self::Dismissed),
            "reported" => Some(Self::Reported),
            "notified" => Some(Self::Notified),
            _ => None,
        }
    }
}

/// A scored pairing between a seeker and a candidate listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub listing: Listing,
    /// Final score in [0, 100] after the learned boost.
    pub score: f64,
    pub match_type: MatchType,
    /// Great-circle distance to the candidate; None when either party has
    /// no coordinates.
    pub distance_km: Option<f64>,
    pub reasons: Vec<String>,
    /// Per-component breakdown (category, skill, proximity, freshness,
    /// reciprocity, quality, boost) for debugging and admin surfaces.
    #[serde(default)]
    pub breakdown: Vec<(String, f64)>,
}

// ═══════════════════════════════════════
// PREFERENCES & LEARNING STATE
// ═══════════════════════════════════════

/// Per-user matching configuration, with tenant defaults applied when a
/// field is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPreferences {
    pub max_distance_km: f64,
    pub min_match_score: f64,
    pub notify_hot_matches: bool,
    pub notify_mutual_matches: bool,
    pub notification_frequency: String,
    #[serde(default)]
    pub categories: Option<Vec<i64>>,
}

impl Default for MatchPreferences {
    fn default() -> Self {
        Self {
            max_distance_km: 50.0,
            min_match_score: 40.0,
            notify_hot_matches: true,
            notify_mutual_matches: true,
            notification_frequency: "daily".to_string(),
            categories: None,
        }
    }
}

/// Learned per-(user, category) preference strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAffinity {
    pub user_id: i64,
    pub category_id: i64,
    /// 0–100, baseline 50.
    pub affinity_score: f64,
    pub viewed_count: i64,
    pub saved_count: i64,
    pub contacted_count: i64,
    pub completed_count: i64,
    pub dismissed_count: i64,
    pub last_interaction: Option<DateTime<Utc>>,
}

/// Learned per-user distance tolerance, bucketed by interaction distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistancePreference {
    pub user_id: i64,
    pub under_2_km: i64,
    pub km_2_to_5: i64,
    pub km_5_to_15: i64,
    pub km_15_to_50: i64,
    pub over_50_km: i64,
    pub stated_max_distance_km: Option<f64>,
    /// Null until at least 5 bucketed interactions exist.
    pub learned_max_distance_km: Option<f64>,
}

impl DistancePreference {
    pub fn total_interactions(&self) -> i64 {
        self.under_2_km + self.km_2_to_5 + self.km_5_to_15 + self.km_15_to_50 + self.over_50_km
    }
}

/// Extra context attached to a recorded interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionMetadata {
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub match_score: Option<f64>,
}

// ═══════════════════════════════════════
// ANALYTICS
// ═══════════════════════════════════════

/// Suggestion→transaction funnel counts. Stages may be skipped, so the
/// counts are not required to be monotonic, but `completed` can never
/// exceed `matched`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionFunnel {
    pub matched: i64,
    pub viewed: i64,
    pub contacted: i64,
    pub completed: i64,
    pub conversion_rate: f64,
}

/// One histogram bucket, labelled by its range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionBucket {
    pub label: String,
    pub count: i64,
}

/// Per-category conversion counts for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConversion {
    pub category_id: i64,
    pub completed: i64,
}

/// Read-only aggregation over the engine's tables for dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub score_distribution: Vec<DistributionBucket>,
    pub distance_distribution: Vec<DistributionBucket>,
    pub funnel: ConversionFunnel,
    pub avg_hours_to_conversion: Option<f64>,
    pub top_converting_categories: Vec<CategoryConversion>,
}
