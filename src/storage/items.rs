use super::schema::Database;
use super::types::{
    FeedItem, ItemDbRow, ParsedItem, PendingShare, ShareMode, ShareQueueEntry, StoreError,
};

/// Maximum number of items to return from any single query
pub(super) const MAX_ITEMS: usize = 2000;

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Insert one item, returning its row id.
    ///
    /// Deliberately a plain `INSERT`: an existing `(feed_id, guid)` surfaces
    /// as [`StoreError::Conflict`] so the writer can count it as skipped.
    pub async fn insert_item(
        &self,
        feed_id: i64,
        profile_id: &str,
        item: &ParsedItem,
        now: i64,
    ) -> Result<i64, StoreError> {
        let categories = serde_json::to_string(&item.categories)?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feed_items
                (feed_id, profile_id, guid, title, link, description, content,
                 author, image_url, published_at, categories, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'new', ?)
            RETURNING id
        "#,
        )
        .bind(feed_id)
        .bind(profile_id)
        .bind(&item.guid)
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.description)
        .bind(&item.content)
        .bind(&item.author)
        .bind(&item.image_url)
        .bind(item.published)
        .bind(categories)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Items of a feed, newest first, capped at 2000
    pub async fn items_for_feed(
        &self,
        feed_id: i64,
        limit: usize,
    ) -> Result<Vec<FeedItem>, StoreError> {
        let limit = i64::try_from(limit.min(MAX_ITEMS)).unwrap_or(i64::MAX);
        let rows: Vec<ItemDbRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, profile_id, guid, title, link, description, content,
                   author, image_url, published_at, categories, status, created_at,
                   processed_at
            FROM feed_items
            WHERE feed_id = ?
            ORDER BY published_at DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ItemDbRow::into_item).collect()
    }

    // ========================================================================
    // Share Outbox
    // ========================================================================

    /// Unprocessed items, oldest first, with the owning feed's publish setting
    pub async fn pending_shares(&self, limit: usize) -> Result<Vec<PendingShare>, StoreError> {
        let limit = i64::try_from(limit.min(MAX_ITEMS)).unwrap_or(i64::MAX);
        let rows: Vec<(i64, String, bool)> = sqlx::query_as(
            r#"
            SELECT i.id, i.profile_id, f.auto_publish
            FROM feed_items i
            JOIN feeds f ON f.id = i.feed_id
            WHERE i.status = 'new'
            ORDER BY i.created_at ASC, i.id ASC
            LIMIT ?
        "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(item_id, profile_id, auto_publish)| PendingShare {
                item_id,
                profile_id,
                auto_publish,
            })
            .collect())
    }

    /// Queue an item for sharing and mark it processed, atomically.
    ///
    /// Returns `false` when another run already processed the item; the
    /// outbox row is then left untouched.
    pub async fn enqueue_share(
        &self,
        item_id: i64,
        profile_id: &str,
        mode: ShareMode,
        now: i64,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            "UPDATE feed_items SET status = 'processed', processed_at = ? WHERE id = ? AND status = 'new'",
        )
        .bind(now)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO share_queue (item_id, profile_id, mode, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(item_id)
        .bind(profile_id)
        .bind(mode.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Outbox contents, oldest first
    pub async fn share_queue(&self, limit: usize) -> Result<Vec<ShareQueueEntry>, StoreError> {
        let limit = i64::try_from(limit.min(MAX_ITEMS)).unwrap_or(i64::MAX);
        let rows: Vec<(i64, i64, String, String, i64)> = sqlx::query_as(
            "SELECT id, item_id, profile_id, mode, created_at FROM share_queue ORDER BY id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, item_id, profile_id, mode, created_at)| -> Result<ShareQueueEntry, StoreError> {
                Ok(ShareQueueEntry {
                    id,
                    item_id,
                    profile_id,
                    mode: mode.parse()?,
                    created_at,
                })
            })
            .collect()
    }
}
