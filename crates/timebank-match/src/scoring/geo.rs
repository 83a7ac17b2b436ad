// scoring/geo.rs
// Haversine distance and geographic decay scoring

use crate::config::ProximityConfig;

/// Mean Earth radius in km.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates via the Haversine formula.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Distance between two optional coordinate pairs. None when either party
/// has no location.
pub fn distance_between(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> Option<f64> {
    let ((lat1, lon1), (lat2, lon2)) = (a?, b?);
    Some(distance_km(lat1, lon1, lat2, lon2))
}

/// Proximity score in [min_score, 1.0]: full score within the radius, then
/// linear decay per km, floored.
pub fn geo_score(distance_km: f64, config: &ProximityConfig) -> f64 {
    if distance_km <= config.full_radius_km {
        return 1.0;
    }
    let decayed = 1.0 - (distance_km - config.full_radius_km) * config.decay_per_km;
    decayed.max(config.min_score)
}

/// Proximity score for an optional distance. Unknown location is neutral -
/// a candidate is never penalized for not sharing coordinates.
pub fn geo_score_opt(distance_km: Option<f64>, config: &ProximityConfig) -> f64 {
    match distance_km {
        Some(d) => geo_score(d, config),
        None => 1.0,
    }
}
