use chrono::Utc;

use crate::error::AppError;
use crate::models::FeedHealth;
use crate::normalize::{category_from_url, feed_name_from_url};
use crate::traits::{FeedFetcher, FeedHealthStore};

/// Fetcher wrapper that records feed health after every attempt.
///
/// Health is updated on the failure path too, before the error propagates —
/// a dead feed still shows up in the health table with its failure count
/// climbing. Health-store write failures are logged and swallowed; they
/// must not turn a successful fetch into a failed one.
#[derive(Clone)]
pub struct TrackedFetcher<F, H>
where
    F: FeedFetcher,
    H: FeedHealthStore,
{
    inner: F,
    health_store: H,
}

impl<F, H> TrackedFetcher<F, H>
where
    F: FeedFetcher,
    H: FeedHealthStore,
{
    pub fn new(inner: F, health_store: H) -> Self {
        Self {
            inner,
            health_store,
        }
    }

    async fn record_attempt(&self, url: &str, item_count: u64, success: bool) {
        let mut health = match self.health_store.find_by_url(url).await {
            Ok(Some(health)) => health,
            Ok(None) => FeedHealth::new(
                url,
                &feed_name_from_url(url),
                Some(category_from_url(url)),
            ),
            Err(e) => {
                tracing::error!(%url, error = %e, "Failed to load feed health");
                return;
            }
        };

        health.record_attempt(item_count, success, Utc::now());

        if let Err(e) = self.health_store.upsert(&health).await {
            tracing::error!(%url, error = %e, "Failed to update feed health");
        }
    }
}

impl<F, H> FeedFetcher for TrackedFetcher<F, H>
where
    F: FeedFetcher,
    H: FeedHealthStore,
{
    async fn fetch(&self, url: &str) -> Result<Vec<serde_json::Value>, AppError> {
        match self.inner.fetch(url).await {
            Ok(items) => {
                self.record_attempt(url, items.len() as u64, true).await;
                Ok(items)
            }
            Err(e) => {
                self.record_attempt(url, 0, false).await;
                Err(e)
            }
        }
    }
}
