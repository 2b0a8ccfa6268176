//! Persists parsed items, relying on the store's `(feed_id, guid)` unique
//! constraint for deduplication.

use serde::Serialize;

use crate::storage::{Feed, FeedStore, ParsedItem, StoreError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub created: usize,
    pub skipped: usize,
}

/// Insert `items` for `feed`, attributed to the feed's owner.
///
/// An item whose guid already exists counts as skipped. Any other store
/// error stops the remaining items and is returned; items inserted before it
/// stay committed and are skipped on the next run.
pub async fn write_items(
    store: &dyn FeedStore,
    feed: &Feed,
    items: &[ParsedItem],
    now: i64,
) -> Result<WriteSummary, StoreError> {
    let mut summary = WriteSummary::default();

    for item in items {
        match store.insert_item(feed.id, &feed.profile_id, item, now).await {
            Ok(_) => summary.created += 1,
            Err(StoreError::Conflict) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(
                    feed_id = feed.id,
                    guid = %item.guid,
                    created = summary.created,
                    error = %e,
                    "Item write failed, abandoning remaining items"
                );
                return Err(e);
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, MemoryStore, NewFeed};
    use pretty_assertions::assert_eq;

    fn item(guid: &str) -> ParsedItem {
        ParsedItem {
            guid: guid.to_string(),
            title: Some(format!("Item {guid}")),
            link: None,
            description: None,
            content: None,
            author: None,
            image_url: None,
            published: None,
            categories: Vec::new(),
        }
    }

    async fn feed_in(store: &dyn FeedStore) -> Feed {
        store
            .insert_feed(
                &NewFeed {
                    profile_id: "owner".to_string(),
                    url: "https://example.com/rss".to_string(),
                    name: "Example".to_string(),
                    auto_publish: false,
                },
                0,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_write_creates_nothing() {
        let db = Database::open(":memory:").await.unwrap();
        let feed = feed_in(&db).await;
        let items = vec![item("a"), item("b"), item("c")];

        let first = write_items(&db, &feed, &items, 10).await.unwrap();
        assert_eq!(first, WriteSummary { created: 3, skipped: 0 });

        let second = write_items(&db, &feed, &items, 20).await.unwrap();
        assert_eq!(second, WriteSummary { created: 0, skipped: 3 });
        assert_eq!(db.items_for_feed(feed.id, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_guid_in_one_batch() {
        let store = MemoryStore::new();
        let feed = feed_in(&store).await;

        let summary = write_items(&store, &feed, &[item("abc123"), item("abc123")], 0)
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary { created: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn test_items_attributed_to_feed_owner() {
        let db = Database::open(":memory:").await.unwrap();
        let feed = feed_in(&db).await;
        write_items(&db, &feed, &[item("a")], 0).await.unwrap();

        let stored = db.items_for_feed(feed.id, 1).await.unwrap();
        assert_eq!(stored[0].profile_id, "owner");
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let store = MemoryStore::new();
        let feed = feed_in(&store).await;
        store.fail_item_writes(feed.id);

        let result = write_items(&store, &feed, &[item("a"), item("b")], 0).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.item_count(feed.id), 0);
    }
}
