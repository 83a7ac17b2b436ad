// scoring/quality.rs
// Quality signals from the candidate listing and its owner's reputation

use timebank_types::{Listing, UserProfile};

/// Description length that counts as a complete listing.
const MIN_DESCRIPTION_LEN: usize = 50;
/// Owner rating that counts as highly rated.
const RATING_THRESHOLD: f64 = 4.0;

/// Quality score in [0.5, 1.0]: base 0.5 plus increments for listing
/// completeness and owner reputation. Unknown owner data simply earns no
/// increment - it never penalizes.
pub fn quality_score(listing: &Listing, owner: Option<&UserProfile>) -> f64 {
    let mut score: f64 = 0.5;

    let desc_len = listing.description.as_deref().map_or(0, str::len);
    if desc_len >= MIN_DESCRIPTION_LEN {
        score += 0.1;
    }
    if desc_len >= MIN_DESCRIPTION_LEN * 2 {
        score += 0.1;
    }

    if listing.image_url.is_some() {
        score += 0.1;
    }

    if let Some(owner) = owner {
        if owner.is_verified {
            score += 0.1;
        }
        if owner.avg_rating.is_some_and(|r| r >= RATING_THRESHOLD) {
            score += 0.1;
        }
    }

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use timebank_types::ListingType;

    fn listing(description: Option<&str>, image: bool) -> Listing {
        Listing {
            id: 1,
            tenant_id: 1,
            owner_id: 2,
            listing_type: ListingType::Offer,
            title: "Gardening".to_string(),
            description: description.map(str::to_string),
            category_id: Some(3),
            category_name: None,
            latitude: None,
            longitude: None,
            image_url: image.then(|| "https://example.net/a.jpg".to_string()),
            created_at: Utc::now(),
        }
    }

    fn owner(verified: bool, rating: Option<f64>) -> UserProfile {
        UserProfile {
            id: 2,
            tenant_id: 1,
            latitude: None,
            longitude: None,
            skills: None,
            is_verified: verified,
            avg_rating: rating,
            transaction_count: 0,
        }
    }

    #[test]
    fn bare_listing_scores_base() {
        assert_eq!(quality_score(&listing(None, false), None), 0.5);
    }

    #[test]
    fn complete_listing_with_reputable_owner_scores_full() {
        let long_desc = "x".repeat(120);
        let l = listing(Some(&long_desc), true);
        let o = owner(true, Some(4.8));
        assert_eq!(quality_score(&l, Some(&o)), 1.0);
    }

    #[test]
    fn description_tiers() {
        let short = listing(Some("tiny"), false);
        assert_eq!(quality_score(&short, None), 0.5);

        let medium = listing(Some(&"x".repeat(60)), false);
        assert!((quality_score(&medium, None) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn low_rating_earns_nothing() {
        let l = listing(None, false);
        let o = owner(false, Some(2.5));
        assert_eq!(quality_score(&l, Some(&o)), 0.5);
    }
}
