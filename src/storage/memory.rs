use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::items::MAX_ITEMS;
use super::store::FeedStore;
use super::types::{
    Feed, FeedHealth, FeedItem, FeedMetadata, FeedStatus, ItemStatus, NewFeed, ParsedItem,
    StoreError,
};

#[derive(Default)]
struct Inner {
    next_feed_id: i64,
    next_item_id: i64,
    feeds: HashMap<i64, Feed>,
    items: Vec<FeedItem>,
    /// feed ids whose item inserts fail with a backend error
    #[cfg(test)]
    broken_item_writes: Vec<i64>,
}

/// In-memory [`FeedStore`] with the same constraint semantics as
/// [`Database`](super::Database). Intended for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge every other test on the store
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite a feed's `last_fetched_at`
    pub fn set_last_fetched(&self, feed_id: i64, at: Option<i64>) {
        if let Some(feed) = self.lock().feeds.get_mut(&feed_id) {
            feed.last_fetched_at = at;
        }
    }

    /// Make every later item insert for `feed_id` fail with a backend error
    #[cfg(test)]
    pub(crate) fn fail_item_writes(&self, feed_id: i64) {
        self.lock().broken_item_writes.push(feed_id);
    }

    pub fn item_count(&self, feed_id: i64) -> usize {
        self.lock()
            .items
            .iter()
            .filter(|i| i.feed_id == feed_id)
            .count()
    }
}

fn not_found(feed_id: i64) -> StoreError {
    StoreError::NotFound {
        entity: "feed",
        id: feed_id,
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn insert_feed(&self, feed: &NewFeed, now: i64) -> Result<Feed, StoreError> {
        let mut inner = self.lock();
        if inner
            .feeds
            .values()
            .any(|f| f.profile_id == feed.profile_id && f.url == feed.url)
        {
            return Err(StoreError::Conflict);
        }

        inner.next_feed_id += 1;
        let stored = Feed {
            id: inner.next_feed_id,
            profile_id: feed.profile_id.clone(),
            url: feed.url.clone(),
            name: feed.name.clone(),
            status: FeedStatus::Active,
            last_fetched_at: None,
            error_count: 0,
            last_error: None,
            title: None,
            description: None,
            site_url: None,
            image_url: None,
            auto_publish: feed.auto_publish,
            created_at: now,
        };
        inner.feeds.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        Ok(self.lock().feeds.get(&feed_id).cloned())
    }

    async fn list_feeds(&self, profile_id: Option<&str>) -> Result<Vec<Feed>, StoreError> {
        let mut feeds: Vec<Feed> = self
            .lock()
            .feeds
            .values()
            .filter(|f| profile_id.map_or(true, |p| f.profile_id == p))
            .cloned()
            .collect();
        feeds.sort_by_key(|f| f.id);
        Ok(feeds)
    }

    async fn due_feeds(&self, cutoff: i64, limit: usize) -> Result<Vec<Feed>, StoreError> {
        let mut due: Vec<Feed> = self
            .lock()
            .feeds
            .values()
            .filter(|f| f.status == FeedStatus::Active)
            .filter(|f| f.last_fetched_at.map_or(true, |at| at <= cutoff))
            .cloned()
            .collect();
        // None < Some(_), matching the never-fetched-first SQL ordering
        due.sort_by_key(|f| (f.last_fetched_at, f.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn insert_item(
        &self,
        feed_id: i64,
        profile_id: &str,
        item: &ParsedItem,
        now: i64,
    ) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        #[cfg(test)]
        if inner.broken_item_writes.contains(&feed_id) {
            return Err(StoreError::Backend("disk I/O error".to_string()));
        }
        if !inner.feeds.contains_key(&feed_id) {
            return Err(StoreError::Backend("FOREIGN KEY constraint failed".to_string()));
        }
        if inner
            .items
            .iter()
            .any(|i| i.feed_id == feed_id && i.guid == item.guid)
        {
            return Err(StoreError::Conflict);
        }

        inner.next_item_id += 1;
        let id = inner.next_item_id;
        inner.items.push(FeedItem {
            id,
            feed_id,
            profile_id: profile_id.to_string(),
            guid: item.guid.clone(),
            title: item.title.clone(),
            link: item.link.clone(),
            description: item.description.clone(),
            content: item.content.clone(),
            author: item.author.clone(),
            image_url: item.image_url.clone(),
            published_at: item.published,
            categories: item.categories.clone(),
            status: ItemStatus::New,
            created_at: now,
            processed_at: None,
        });
        Ok(id)
    }

    async fn items_for_feed(&self, feed_id: i64, limit: usize) -> Result<Vec<FeedItem>, StoreError> {
        let mut items: Vec<FeedItem> = self
            .lock()
            .items
            .iter()
            .filter(|i| i.feed_id == feed_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        items.truncate(limit.min(MAX_ITEMS));
        Ok(items)
    }

    async fn record_success(
        &self,
        feed_id: i64,
        now: i64,
        metadata: &FeedMetadata,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let feed = inner.feeds.get_mut(&feed_id).ok_or_else(|| not_found(feed_id))?;

        feed.last_fetched_at = Some(now);
        feed.error_count = 0;
        feed.last_error = None;
        if metadata.title.is_some() {
            feed.title = metadata.title.clone();
        }
        if metadata.description.is_some() {
            feed.description = metadata.description.clone();
        }
        if metadata.site_url.is_some() {
            feed.site_url = metadata.site_url.clone();
        }
        if metadata.image_url.is_some() {
            feed.image_url = metadata.image_url.clone();
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        feed_id: i64,
        now: i64,
        error: &str,
        threshold: i64,
    ) -> Result<FeedHealth, StoreError> {
        let mut inner = self.lock();
        let feed = inner.feeds.get_mut(&feed_id).ok_or_else(|| not_found(feed_id))?;

        feed.last_fetched_at = Some(now);
        feed.error_count += 1;
        feed.last_error = Some(error.to_string());
        if feed.status == FeedStatus::Active && feed.error_count >= threshold {
            feed.status = FeedStatus::Error;
        }
        Ok(FeedHealth {
            error_count: feed.error_count,
            status: feed.status,
        })
    }

    async fn set_status(&self, feed_id: i64, status: FeedStatus) -> Result<Feed, StoreError> {
        let mut inner = self.lock();
        let feed = inner.feeds.get_mut(&feed_id).ok_or_else(|| not_found(feed_id))?;
        feed.status = status;
        Ok(feed.clone())
    }

    async fn reactivate(&self, feed_id: i64) -> Result<Feed, StoreError> {
        let mut inner = self.lock();
        let feed = inner.feeds.get_mut(&feed_id).ok_or_else(|| not_found(feed_id))?;
        feed.status = FeedStatus::Active;
        feed.error_count = 0;
        feed.last_error = None;
        Ok(feed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_feed(n: i64) -> NewFeed {
        NewFeed {
            profile_id: "p".to_string(),
            url: format!("https://feed{n}.example.com/rss"),
            name: format!("Feed {n}"),
            auto_publish: false,
        }
    }

    fn item(guid: &str) -> ParsedItem {
        ParsedItem {
            guid: guid.to_string(),
            title: None,
            link: None,
            description: None,
            content: None,
            author: None,
            image_url: None,
            published: None,
            categories: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_matches_sql_ordering() {
        let store = MemoryStore::new();
        let a = store.insert_feed(&new_feed(1), 0).await.unwrap();
        let b = store.insert_feed(&new_feed(2), 0).await.unwrap();
        let c = store.insert_feed(&new_feed(3), 0).await.unwrap();
        store.set_last_fetched(a.id, Some(50));
        store.set_last_fetched(c.id, Some(10));

        let ids: Vec<i64> = store
            .due_feeds(100, 10)
            .await
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![b.id, c.id, a.id]);
    }

    #[tokio::test]
    async fn test_memory_store_conflicts() {
        let store = MemoryStore::new();
        let feed = store.insert_feed(&new_feed(1), 0).await.unwrap();
        assert!(matches!(
            store.insert_feed(&new_feed(1), 0).await,
            Err(StoreError::Conflict)
        ));

        store.insert_item(feed.id, "p", &item("g"), 0).await.unwrap();
        assert!(matches!(
            store.insert_item(feed.id, "p", &item("g"), 0).await,
            Err(StoreError::Conflict)
        ));
        assert_eq!(store.item_count(feed.id), 1);
    }

    #[tokio::test]
    async fn test_memory_store_broken_writes() {
        let store = MemoryStore::new();
        let feed = store.insert_feed(&new_feed(1), 0).await.unwrap();
        store.fail_item_writes(feed.id);

        assert!(matches!(
            store.insert_item(feed.id, "p", &item("g"), 0).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_items_for_feed_capped_like_sql() {
        let store = MemoryStore::new();
        let feed = store.insert_feed(&new_feed(1), 0).await.unwrap();
        for n in 0..MAX_ITEMS + 5 {
            store
                .insert_item(feed.id, "p", &item(&format!("g{n}")), 0)
                .await
                .unwrap();
        }

        let items = store.items_for_feed(feed.id, usize::MAX).await.unwrap();
        assert_eq!(items.len(), MAX_ITEMS);
        assert_eq!(items[0].guid, format!("g{}", MAX_ITEMS + 4));
        assert_eq!(store.items_for_feed(feed.id, 3).await.unwrap().len(), 3);
    }
}
