//! Per-feed health bookkeeping: consecutive error count, last error and the
//! `active` → `error` escalation.

use crate::ingest::ErrorCode;
use crate::storage::{Feed, FeedHealth, FeedMetadata, FeedStatus, FeedStore, StoreError};
use crate::util::truncate_chars;

/// Longest `last_error` stored on a feed, in characters
pub const MAX_ERROR_LEN: usize = 500;

/// `"<CODE>: <message>"`, capped at [`MAX_ERROR_LEN`] characters
pub fn format_error(code: ErrorCode, message: &str) -> String {
    let full = format!("{code}: {message}");
    truncate_chars(&full, MAX_ERROR_LEN).into_owned()
}

/// Record a successful fetch of `feed` as it was selected for this run.
///
/// Returns `true` when this success ended a run of consecutive failures.
pub async fn record_success(
    store: &dyn FeedStore,
    feed: &Feed,
    now: i64,
    metadata: &FeedMetadata,
) -> Result<bool, StoreError> {
    store.record_success(feed.id, now, metadata).await?;

    let recovered = feed.error_count > 0;
    if recovered {
        tracing::info!(
            feed_id = feed.id,
            previous_failures = feed.error_count,
            "Feed recovered"
        );
    }
    Ok(recovered)
}

/// Record a failed fetch; the feed moves to `error` once the consecutive
/// count reaches `threshold`.
pub async fn record_failure(
    store: &dyn FeedStore,
    feed_id: i64,
    now: i64,
    code: ErrorCode,
    message: &str,
    threshold: i64,
) -> Result<FeedHealth, StoreError> {
    let last_error = format_error(code, message);
    let health = store
        .record_failure(feed_id, now, &last_error, threshold)
        .await?;

    if health.status == FeedStatus::Error && health.error_count == threshold {
        tracing::warn!(
            feed_id,
            failures = health.error_count,
            error = %last_error,
            "Feed disabled after repeated failures; reactivate to resume"
        );
    }
    Ok(health)
}

/// Return a paused or errored feed to `active` with a clean error state.
pub async fn reactivate(store: &dyn FeedStore, feed_id: i64) -> Result<Feed, StoreError> {
    let feed = store.reactivate(feed_id).await?;
    tracing::info!(feed_id, "Feed reactivated");
    Ok(feed)
}
