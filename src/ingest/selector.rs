//! Picks the feeds a scheduled run should process.

use crate::config::Config;
use crate::storage::{Feed, FeedStore, StoreError};

/// Active feeds that are due at `now`.
///
/// A feed is due when it was never fetched or its last fetch is at least
/// `min_refetch_interval_minutes` old. Never-fetched feeds come first, then
/// the stalest; at most `max_feeds_per_run` are returned. Paused and errored
/// feeds are never selected.
pub async fn select_due_feeds(
    store: &dyn FeedStore,
    now: i64,
    config: &Config,
) -> Result<Vec<Feed>, StoreError> {
    let cutoff = now.saturating_sub(config.min_refetch_interval_secs());
    let feeds = store.due_feeds(cutoff, config.max_feeds_per_run).await?;
    tracing::debug!(cutoff, due = feeds.len(), "Selected due feeds");
    Ok(feeds)
}
