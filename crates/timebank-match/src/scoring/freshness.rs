// scoring/freshness.rs
// Exponential decay scoring of listing age
//
// Always evaluated against the caller's clock at query time - freshness is
// a function of "now" and must never be cached.

use chrono::{DateTime, Utc};

use crate::config::FreshnessConfig;

/// Freshness score in [minimum, 1.0]: full score while the listing is
/// younger than full_hours, then half-life decay, floored.
pub fn freshness_score(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &FreshnessConfig,
) -> f64 {
    let age_hours = (now - created_at).num_seconds() as f64 / 3600.0;

    if age_hours <= config.full_hours {
        return 1.0;
    }

    let excess = age_hours - config.full_hours;
    let decay = (-std::f64::consts::LN_2 * excess / config.half_life_hours).exp();
    decay.max(config.minimum)
}
