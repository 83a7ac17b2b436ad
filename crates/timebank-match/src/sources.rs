// crates/timebank-match/src/sources.rs
// Trait seams to the external collaborators the engine consumes:
// the listings subsystem, the user read model, and the notification
// dispatcher. The engine never reaches into their storage directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use timebank_types::{Listing, ListingType, MatchResult, UserProfile};

use crate::error::Result;

/// Read access to the listings subsystem.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// A user's own active listings, newest first.
    async fn active_listings_for_user(&self, tenant_id: i64, user_id: i64)
    -> Result<Vec<Listing>>;

    /// Active candidate listings of the given type within a tenant,
    /// excluding the seeker's own. `category_filter` narrows the pool;
    /// `limit` bounds it.
    async fn candidate_listings(
        &self,
        tenant_id: i64,
        listing_type: ListingType,
        exclude_user_id: i64,
        category_filter: Option<&[i64]>,
        limit: usize,
    ) -> Result<Vec<Listing>>;

    /// Active listing ids in a category (for cache invalidation).
    async fn listing_ids_in_category(&self, tenant_id: i64, category_id: i64)
    -> Result<Vec<i64>>;

    /// Active listings created since the given instant (for the
    /// notification sweep).
    async fn recent_listings(&self, tenant_id: i64, since: DateTime<Utc>)
    -> Result<Vec<Listing>>;
}

/// Read access to the user read model.
#[async_trait]
pub trait UserSource: Send + Sync {
    /// Profile subset for scoring; None when the user does not exist or is
    /// inactive.
    async fn profile(&self, tenant_id: i64, user_id: i64) -> Result<Option<UserProfile>>;
}

/// Best-effort sink for match events. Delivery is the notification
/// subsystem's problem; the engine only hands over the match and moves on.
#[async_trait]
pub trait MatchNotifier: Send + Sync {
    async fn hot_match(&self, tenant_id: i64, user_id: i64, result: &MatchResult) -> Result<()>;
}

/// Notifier that drops everything. Default for deployments without a
/// notification subsystem, and for tests.
pub struct NullNotifier;

#[async_trait]
impl MatchNotifier for NullNotifier {
    async fn hot_match(&self, _tenant_id: i64, _user_id: i64, _result: &MatchResult) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! In-memory collaborator implementations for unit tests.

    use super::*;
    use std::sync::Mutex;

    pub struct StaticListings {
        listings: Vec<Listing>,
    }

    impl StaticListings {
        pub fn new(listings: Vec<Listing>) -> Self {
            Self { listings }
        }
    }

    #[async_trait]
    impl ListingSource for StaticListings {
        async fn active_listings_for_user(
            &self,
            tenant_id: i64,
            user_id: i64,
        ) -> Result<Vec<Listing>> {
            let mut listings: Vec<Listing> = self
                .listings
                .iter()
                .filter(|l| l.tenant_id == tenant_id && l.owner_id == user_id)
                .cloned()
                .collect();
            listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(listings)
        }

        async fn candidate_listings(
            &self,
            tenant_id: i64,
            listing_type: ListingType,
            exclude_user_id: i64,
            category_filter: Option<&[i64]>,
            limit: usize,
        ) -> Result<Vec<Listing>> {
            Ok(self
                .listings
                .iter()
                .filter(|l| {
                    l.tenant_id == tenant_id
                        && l.listing_type == listing_type
                        && l.owner_id != exclude_user_id
                        && category_filter.is_none_or(|cats| {
                            l.category_id.is_some_and(|c| cats.contains(&c))
                        })
                })
                .take(limit)
                .cloned()
                .collect())
        }

        async fn listing_ids_in_category(
            &self,
            tenant_id: i64,
            category_id: i64,
        ) -> Result<Vec<i64>> {
            Ok(self
                .listings
                .iter()
                .filter(|l| l.tenant_id == tenant_id && l.category_id == Some(category_id))
                .map(|l| l.id)
                .collect())
        }

        async fn recent_listings(
            &self,
            tenant_id: i64,
            since: DateTime<Utc>,
        ) -> Result<Vec<Listing>> {
            Ok(self
                .listings
                .iter()
                .filter(|l| l.tenant_id == tenant_id && l.created_at >= since)
                .cloned()
                .collect())
        }
    }

    pub struct StaticUsers {
        profiles: Vec<UserProfile>,
    }

    impl StaticUsers {
        pub fn new(profiles: Vec<UserProfile>) -> Self {
            Self { profiles }
        }
    }

    #[async_trait]
    impl UserSource for StaticUsers {
        async fn profile(&self, tenant_id: i64, user_id: i64) -> Result<Option<UserProfile>> {
            Ok(self
                .profiles
                .iter()
                .find(|p| p.tenant_id == tenant_id && p.id == user_id)
                .cloned())
        }
    }

    /// User source whose lookups always fail, for fallback-path tests.
    pub struct FailingUsers;

    #[async_trait]
    impl UserSource for FailingUsers {
        async fn profile(&self, _tenant_id: i64, _user_id: i64) -> Result<Option<UserProfile>> {
            Err(crate::error::MatchError::UserSource(
                "user read model unavailable".to_string(),
            ))
        }
    }

    /// Notifier that records every delivery for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub deliveries: Mutex<Vec<(i64, i64, i64)>>,
    }

    #[async_trait]
    impl MatchNotifier for RecordingNotifier {
        async fn hot_match(
            &self,
            tenant_id: i64,
            user_id: i64,
            result: &MatchResult,
        ) -> Result<()> {
            self.deliveries
                .lock()
                .unwrap()
                .push((tenant_id, user_id, result.listing.id));
            Ok(())
        }
    }
}
