use async_trait::async_trait;

use super::types::{Feed, FeedHealth, FeedItem, FeedMetadata, FeedStatus, NewFeed, ParsedItem, StoreError};

/// Data-access seam used by the ingestion pipeline.
///
/// [`Database`](super::Database) is the production implementation;
/// [`MemoryStore`](super::MemoryStore) has the same semantics and backs
/// tests. Implementations must report a duplicate `(feed_id, guid)` insert
/// as [`StoreError::Conflict`].
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Create a feed owned by `feed.profile_id`. Duplicate `(profile_id, url)`
    /// yields [`StoreError::Conflict`].
    async fn insert_feed(&self, feed: &NewFeed, now: i64) -> Result<Feed, StoreError>;

    async fn find_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError>;

    /// All feeds, optionally restricted to one owner, ordered by id
    async fn list_feeds(&self, profile_id: Option<&str>) -> Result<Vec<Feed>, StoreError>;

    /// Active feeds never fetched or last fetched at or before `cutoff`.
    ///
    /// Never-fetched feeds come first, then the oldest fetch; at most
    /// `limit` rows.
    async fn due_feeds(&self, cutoff: i64, limit: usize) -> Result<Vec<Feed>, StoreError>;

    /// Insert one item attributed to `profile_id`, returning its id.
    async fn insert_item(
        &self,
        feed_id: i64,
        profile_id: &str,
        item: &ParsedItem,
        now: i64,
    ) -> Result<i64, StoreError>;

    /// Items of a feed, newest first
    async fn items_for_feed(&self, feed_id: i64, limit: usize) -> Result<Vec<FeedItem>, StoreError>;

    /// Stamp a successful fetch: clears error state and caches metadata.
    async fn record_success(
        &self,
        feed_id: i64,
        now: i64,
        metadata: &FeedMetadata,
    ) -> Result<(), StoreError>;

    /// Stamp a failed fetch: bumps the consecutive error count and moves the
    /// feed to [`FeedStatus::Error`] once the count reaches `threshold`.
    async fn record_failure(
        &self,
        feed_id: i64,
        now: i64,
        error: &str,
        threshold: i64,
    ) -> Result<FeedHealth, StoreError>;

    async fn set_status(&self, feed_id: i64, status: FeedStatus) -> Result<Feed, StoreError>;

    /// Back to [`FeedStatus::Active`] with a zero error count and no last error.
    async fn reactivate(&self, feed_id: i64) -> Result<Feed, StoreError>;
}

#[async_trait]
impl FeedStore for super::Database {
    async fn insert_feed(&self, feed: &NewFeed, now: i64) -> Result<Feed, StoreError> {
        super::Database::insert_feed(self, feed, now).await
    }

    async fn find_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        super::Database::find_feed(self, feed_id).await
    }

    async fn list_feeds(&self, profile_id: Option<&str>) -> Result<Vec<Feed>, StoreError> {
        super::Database::list_feeds(self, profile_id).await
    }

    async fn due_feeds(&self, cutoff: i64, limit: usize) -> Result<Vec<Feed>, StoreError> {
        super::Database::due_feeds(self, cutoff, limit).await
    }

    async fn insert_item(
        &self,
        feed_id: i64,
        profile_id: &str,
        item: &ParsedItem,
        now: i64,
    ) -> Result<i64, StoreError> {
        super::Database::insert_item(self, feed_id, profile_id, item, now).await
    }

    async fn items_for_feed(&self, feed_id: i64, limit: usize) -> Result<Vec<FeedItem>, StoreError> {
        super::Database::items_for_feed(self, feed_id, limit).await
    }

    async fn record_success(
        &self,
        feed_id: i64,
        now: i64,
        metadata: &FeedMetadata,
    ) -> Result<(), StoreError> {
        super::Database::record_success(self, feed_id, now, metadata).await
    }

    async fn record_failure(
        &self,
        feed_id: i64,
        now: i64,
        error: &str,
        threshold: i64,
    ) -> Result<FeedHealth, StoreError> {
        super::Database::record_failure(self, feed_id, now, error, threshold).await
    }

    async fn set_status(&self, feed_id: i64, status: FeedStatus) -> Result<Feed, StoreError> {
        super::Database::set_status(self, feed_id, status).await
    }

    async fn reactivate(&self, feed_id: i64) -> Result<Feed, StoreError> {
        super::Database::reactivate(self, feed_id).await
    }
}
