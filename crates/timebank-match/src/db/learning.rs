// db/learning.rs
// user_category_affinity and user_distance_preference operations
//
// Every counter move is a single-statement atomic upsert. Two simultaneous
// interactions for the same (user, category) both land; there is no
// read-modify-write window to lose one in.

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use timebank_types::{CategoryAffinity, DistancePreference, MatchAction};

use crate::config::LearningConfig;

/// Distance bucket midpoints in km (0-2, 2-5, 5-15, 15-50, 50+).
pub const BUCKET_MIDPOINTS: [f64; 5] = [1.0, 3.5, 10.0, 32.5, 75.0];

/// Fixed mapping from action to affinity counter columns, expressed as 0/1
/// increments bound as parameters. Order: viewed, saved, contacted,
/// completed, dismissed. Reported carries weight but no counter.
fn counter_flags(action: MatchAction) -> [i64; 5] {
    match action {
        MatchAction::Viewed => [1, 0, 0, 0, 0],
        MatchAction::Saved => [0, 1, 0, 0, 0],
        MatchAction::Contacted => [0, 0, 1, 0, 0],
        MatchAction::Completed => [0, 0, 0, 1, 0],
        MatchAction::Dismissed => [0, 0, 0, 0, 1],
        MatchAction::Reported | MatchAction::Notified => [0, 0, 0, 0, 0],
    }
}

/// Index of the distance bucket a distance falls into.
fn bucket_index(distance_km: f64) -> usize {
    if distance_km < 2.0 {
        0
    } else if distance_km < 5.0 {
        1
    } else if distance_km < 15.0 {
        2
    } else if distance_km < 50.0 {
        3
    } else {
        4
    }
}

/// Record an interaction against the (user, category) affinity row.
///
/// New rows seed at `50 + weight × seed_step`; existing rows move by
/// `weight × step`. Both paths clamp to [0, 100] inside the statement, so
/// the invariant holds under any interleaving.
pub fn record_affinity_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    category_id: i64,
    action: MatchAction,
    config: &LearningConfig,
) -> Result<()> {
    let weight = action.weight();
    let seed = 50.0 + weight * config.affinity_seed_step;
    let step = weight * config.affinity_step;
    let [viewed, saved, contacted, completed, dismissed] = counter_flags(action);

    conn.execute(
        "INSERT INTO user_category_affinity
            (tenant_id, user_id, category_id, affinity_score,
             viewed_count, saved_count, contacted_count, completed_count,
             dismissed_count, last_interaction)
         VALUES (?1, ?2, ?3, MIN(100.0, MAX(0.0, ?4)),
                 ?5, ?6, ?7, ?8, ?9, datetime('now'))
         ON CONFLICT(user_id, category_id) DO UPDATE SET
            affinity_score = MIN(100.0, MAX(0.0, affinity_score + ?10)),
            viewed_count = viewed_count + ?5,
            saved_count = saved_count + ?6,
            contacted_count = contacted_count + ?7,
            completed_count = completed_count + ?8,
            dismissed_count = dismissed_count + ?9,
            last_interaction = datetime('now')",
        params![
            tenant_id, user_id, category_id, seed, viewed, saved, contacted, completed,
            dismissed, step,
        ],
    )?;
    Ok(())
}

/// Record a positive interaction's distance in the user's bucket counters
/// and recompute the learned maximum.
///
/// The learned max is `multiplier ×` the counter-weighted mean bucket
/// midpoint, and stays NULL until min_interactions bucketed interactions
/// exist. The recompute is a single cheap UPDATE over one row.
pub fn record_distance_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    distance_km: f64,
    config: &LearningConfig,
) -> Result<()> {
    let mut flags = [0i64; 5];
    flags[bucket_index(distance_km)] = 1;
    let [b0, b1, b2, b3, b4] = flags;

    conn.execute(
        "INSERT INTO user_distance_preference
            (tenant_id, user_id, under_2_km, km_2_to_5, km_5_to_15, km_15_to_50, over_50_km)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_id) DO UPDATE SET
            under_2_km = under_2_km + ?3,
            km_2_to_5 = km_2_to_5 + ?4,
            km_5_to_15 = km_5_to_15 + ?5,
            km_15_to_50 = km_15_to_50 + ?6,
            over_50_km = over_50_km + ?7,
            updated_at = datetime('now')",
        params![tenant_id, user_id, b0, b1, b2, b3, b4],
    )?;

    conn.execute(
        "UPDATE user_distance_preference SET
            learned_max_distance_km = CASE
              WHEN (under_2_km + km_2_to_5 + km_5_to_15 + km_15_to_50 + over_50_km) >= ?1
              THEN ?2 * (under_2_km * 1.0 + km_2_to_5 * 3.5 + km_5_to_15 * 10.0
                         + km_15_to_50 * 32.5 + over_50_km * 75.0)
                   / (under_2_km + km_2_to_5 + km_5_to_15 + km_15_to_50 + over_50_km)
              ELSE NULL
            END
         WHERE user_id = ?3",
        params![
            config.min_interactions,
            config.learned_distance_multiplier,
            user_id
        ],
    )?;
    Ok(())
}

/// Record the user's stated maximum distance alongside the learned
/// buckets, so the two tolerances can be compared.
pub fn set_stated_distance_sync(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    stated_max_km: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO user_distance_preference (tenant_id, user_id, stated_max_distance_km)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
            stated_max_distance_km = excluded.stated_max_distance_km,
            updated_at = datetime('now')",
        params![tenant_id, user_id, stated_max_km],
    )?;
    Ok(())
}

/// Affinity row for a (user, category), if one exists.
pub fn get_affinity_sync(
    conn: &Connection,
    user_id: i64,
    category_id: i64,
) -> Result<Option<CategoryAffinity>> {
    conn.query_row(
        "SELECT user_id, category_id, affinity_score, viewed_count, saved_count,
                contacted_count, completed_count, dismissed_count, last_interaction
         FROM user_category_affinity
         WHERE user_id = ? AND category_id = ?",
        params![user_id, category_id],
        |row| {
            let last_interaction: Option<String> = row.get(8)?;
            Ok(CategoryAffinity {
                user_id: row.get(0)?,
                category_id: row.get(1)?,
                affinity_score: row.get(2)?,
                viewed_count: row.get(3)?,
                saved_count: row.get(4)?,
                contacted_count: row.get(5)?,
                completed_count: row.get(6)?,
                dismissed_count: row.get(7)?,
                last_interaction: super::parse_timestamp(last_interaction),
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Distance preference row for a user, if one exists.
pub fn get_distance_preference_sync(
    conn: &Connection,
    user_id: i64,
) -> Result<Option<DistancePreference>> {
    conn.query_row(
        "SELECT user_id, under_2_km, km_2_to_5, km_5_to_15, km_15_to_50, over_50_km,
                stated_max_distance_km, learned_max_distance_km
         FROM user_distance_preference
         WHERE user_id = ?",
        params![user_id],
        |row| {
            Ok(DistancePreference {
                user_id: row.get(0)?,
                under_2_km: row.get(1)?,
                km_2_to_5: row.get(2)?,
                km_5_to_15: row.get(3)?,
                km_15_to_50: row.get(4)?,
                over_50_km: row.get(5)?,
                stated_max_distance_km: row.get(6)?,
                learned_max_distance_km: row.get(7)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Boost contribution from learned category affinity, in
/// ±config.affinity_clamp.
pub fn affinity_boost(affinity_score: f64, config: &LearningConfig) -> f64 {
    let raw = (affinity_score - 50.0) / config.affinity_divisor;
    raw.clamp(-config.affinity_clamp, config.affinity_clamp)
}

/// Boost contribution from learned distance tolerance. Neutral when either
/// the candidate distance or the learned maximum is unknown.
pub fn distance_boost(
    distance_km: Option<f64>,
    learned_max_km: Option<f64>,
    config: &LearningConfig,
) -> f64 {
    let (Some(distance), Some(learned)) = (distance_km, learned_max_km) else {
        return 0.0;
    };
    if learned <= 0.0 {
        return 0.0;
    }
    let ratio = distance / learned;
    let [near, within, stretch, far] = config.distance_tiers;
    if ratio <= 0.5 {
        near
    } else if ratio <= 1.0 {
        within
    } else if ratio <= 1.5 {
        stretch
    } else {
        far
    }
}

/// Combined historical boost for a candidate, clamped to
/// ±config.boost_clamp.
pub fn historical_boost_sync(
    conn: &Connection,
    user_id: i64,
    category_id: Option<i64>,
    distance_km: Option<f64>,
    config: &LearningConfig,
) -> Result<f64> {
    let mut boost = 0.0;

    if let Some(category) = category_id
        && let Some(affinity) = get_affinity_sync(conn, user_id, category)?
    {
        boost += affinity_boost(affinity.affinity_score, config);
    }

    let learned = get_distance_preference_sync(conn, user_id)?
        .and_then(|pref| pref.learned_max_distance_km);
    boost += distance_boost(distance_km, learned, config);

    Ok(boost.clamp(-config.boost_clamp, config.boost_clamp))
}

/// Delete all learned state for a user. Runs in one transaction so a
/// concurrent scoring read sees either the old rows or none of them.
pub fn reset_user_learning_sync(conn: &Connection, user_id: i64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM user_category_affinity WHERE user_id = ?",
        params![user_id],
    )?;
    tx.execute(
        "DELETE FROM user_distance_preference WHERE user_id = ?",
        params![user_id],
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_migrations;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn config() -> LearningConfig {
        LearningConfig::default()
    }

    #[test]
    fn first_interaction_seeds_affinity() {
        let conn = test_conn();
        record_affinity_sync(&conn, 1, 2, 4, MatchAction::Viewed, &config()).unwrap();

        let affinity = get_affinity_sync(&conn, 2, 4).unwrap().unwrap();
        // 50 + 0.1 * 10
        assert_eq!(affinity.affinity_score, 51.0);
        assert_eq!(affinity.viewed_count, 1);
        assert_eq!(affinity.saved_count, 0);
        assert!(affinity.last_interaction.is_some());
    }

    #[test]
    fn repeated_interactions_step_affinity() {
        let conn = test_conn();
        record_affinity_sync(&conn, 1, 2, 4, MatchAction::Completed, &config()).unwrap();
        // seed: 50 + 1.0 * 10 = 60
        record_affinity_sync(&conn, 1, 2, 4, MatchAction::Completed, &config()).unwrap();
        // step: 60 + 1.0 * 2 = 62
        let affinity = get_affinity_sync(&conn, 2, 4).unwrap().unwrap();
        assert_eq!(affinity.affinity_score, 62.0);
        assert_eq!(affinity.completed_count, 2);
    }

    #[test]
    fn affinity_stays_within_bounds_under_repeated_reports() {
        let conn = test_conn();
        for _ in 0..100 {
            record_affinity_sync(&conn, 1, 2, 4, MatchAction::Reported, &config()).unwrap();
        }
        let affinity = get_affinity_sync(&conn, 2, 4).unwrap().unwrap();
        assert!(affinity.affinity_score >= 0.0);
        assert_eq!(affinity.affinity_score, 0.0);

        for _ in 0..200 {
            record_affinity_sync(&conn, 1, 2, 4, MatchAction::Completed, &config()).unwrap();
        }
        let affinity = get_affinity_sync(&conn, 2, 4).unwrap().unwrap();
        assert!(affinity.affinity_score <= 100.0);
    }

    #[test]
    fn learned_distance_null_until_fifth_interaction() {
        let conn = test_conn();
        for i in 0..4 {
            record_distance_sync(&conn, 1, 2, 3.0, &config()).unwrap();
            let pref = get_distance_preference_sync(&conn, 2).unwrap().unwrap();
            assert!(
                pref.learned_max_distance_km.is_none(),
                "learned max appeared after {} interactions",
                i + 1
            );
        }

        record_distance_sync(&conn, 1, 2, 3.0, &config()).unwrap();
        let pref = get_distance_preference_sync(&conn, 2).unwrap().unwrap();
        // Five interactions in the 2-5 km bucket: 1.5 * 3.5
        assert_eq!(pref.learned_max_distance_km, Some(5.25));
        assert_eq!(pref.km_2_to_5, 5);
    }

    #[test]
    fn learned_distance_weights_buckets() {
        let conn = test_conn();
        for _ in 0..3 {
            record_distance_sync(&conn, 1, 2, 1.0, &config()).unwrap();
        }
        for _ in 0..3 {
            record_distance_sync(&conn, 1, 2, 30.0, &config()).unwrap();
        }
        let pref = get_distance_preference_sync(&conn, 2).unwrap().unwrap();
        // (3*1.0 + 3*32.5) / 6 * 1.5 = 25.125
        let learned = pref.learned_max_distance_km.unwrap();
        assert!((learned - 25.125).abs() < 1e-9);
    }

    #[test]
    fn bucket_edges() {
        assert_eq!(bucket_index(0.0), 0);
        assert_eq!(bucket_index(1.9), 0);
        assert_eq!(bucket_index(2.0), 1);
        assert_eq!(bucket_index(4.9), 1);
        assert_eq!(bucket_index(5.0), 2);
        assert_eq!(bucket_index(14.9), 2);
        assert_eq!(bucket_index(15.0), 3);
        assert_eq!(bucket_index(49.9), 3);
        assert_eq!(bucket_index(50.0), 4);
        assert_eq!(bucket_index(500.0), 4);
    }

    #[test]
    fn boost_tiers() {
        let cfg = config();
        assert_eq!(distance_boost(Some(2.0), Some(10.0), &cfg), 3.0);
        assert_eq!(distance_boost(Some(5.0), Some(10.0), &cfg), 3.0);
        assert_eq!(distance_boost(Some(10.0), Some(10.0), &cfg), 1.0);
        assert_eq!(distance_boost(Some(15.0), Some(10.0), &cfg), -1.0);
        assert_eq!(distance_boost(Some(16.0), Some(10.0), &cfg), -3.0);
        assert_eq!(distance_boost(Some(3.0), None, &cfg), 0.0);
        assert_eq!(distance_boost(None, Some(10.0), &cfg), 0.0);
    }

    #[test]
    fn affinity_boost_clamps() {
        let cfg = config();
        assert_eq!(affinity_boost(50.0, &cfg), 0.0);
        assert_eq!(affinity_boost(100.0, &cfg), 5.0);
        assert_eq!(affinity_boost(0.0, &cfg), -5.0);
        assert_eq!(affinity_boost(72.0, &cfg), 2.2);
    }

    #[test]
    fn historical_boost_combines_and_clamps() {
        let conn = test_conn();
        let cfg = config();

        // No learned state: neutral
        let boost = historical_boost_sync(&conn, 2, Some(4), Some(3.0), &cfg).unwrap();
        assert_eq!(boost, 0.0);

        // Strong affinity plus close distance
        for _ in 0..30 {
            record_affinity_sync(&conn, 1, 2, 4, MatchAction::Completed, &cfg).unwrap();
        }
        for _ in 0..5 {
            record_distance_sync(&conn, 1, 2, 3.0, &cfg).unwrap();
        }
        let boost = historical_boost_sync(&conn, 2, Some(4), Some(2.0), &cfg).unwrap();
        assert!(boost > 0.0);
        assert!(boost <= cfg.boost_clamp);
    }

    #[test]
    fn stated_distance_round_trips() {
        let conn = test_conn();
        set_stated_distance_sync(&conn, 1, 2, 25.0).unwrap();

        let pref = get_distance_preference_sync(&conn, 2).unwrap().unwrap();
        assert_eq!(pref.stated_max_distance_km, Some(25.0));
        assert!(pref.learned_max_distance_km.is_none());

        // Buckets accumulate on the same row without clobbering it
        record_distance_sync(&conn, 1, 2, 3.0, &config()).unwrap();
        let pref = get_distance_preference_sync(&conn, 2).unwrap().unwrap();
        assert_eq!(pref.stated_max_distance_km, Some(25.0));
        assert_eq!(pref.km_2_to_5, 1);
    }

    #[test]
    fn reset_clears_both_tables() {
        let conn = test_conn();
        let cfg = config();
        record_affinity_sync(&conn, 1, 2, 4, MatchAction::Saved, &cfg).unwrap();
        record_distance_sync(&conn, 1, 2, 3.0, &cfg).unwrap();

        reset_user_learning_sync(&conn, 2).unwrap();
        assert!(get_affinity_sync(&conn, 2, 4).unwrap().is_none());
        assert!(get_distance_preference_sync(&conn, 2).unwrap().is_none());
    }
}
