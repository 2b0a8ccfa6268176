use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Feed, FeedDbRow, FeedHealth, FeedMetadata, FeedStatus, NewFeed, StoreError};

/// Column list matching [`FeedDbRow`]
const FEED_COLUMNS: &str = "id, profile_id, url, name, status, last_fetched_at, error_count, \
     last_error, title, description, site_url, image_url, auto_publish, created_at";

fn not_found(feed_id: i64) -> StoreError {
    StoreError::NotFound {
        entity: "feed",
        id: feed_id,
    }
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Create a feed subscription. Duplicate `(profile_id, url)` → `Conflict`.
    pub async fn insert_feed(&self, feed: &NewFeed, now: i64) -> Result<Feed, StoreError> {
        let sql = format!(
            "INSERT INTO feeds (profile_id, url, name, auto_publish, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {FEED_COLUMNS}"
        );
        let row: FeedDbRow = sqlx::query_as(&sql)
            .bind(&feed.profile_id)
            .bind(&feed.url)
            .bind(&feed.name)
            .bind(feed.auto_publish)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        row.into_feed()
    }

    pub async fn find_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?");
        let row: Option<FeedDbRow> = sqlx::query_as(&sql)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(FeedDbRow::into_feed).transpose()
    }

    /// List feeds, optionally only those owned by `profile_id`
    pub async fn list_feeds(&self, profile_id: Option<&str>) -> Result<Vec<Feed>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {FEED_COLUMNS} FROM feeds"));
        if let Some(profile_id) = profile_id {
            builder.push(" WHERE profile_id = ");
            builder.push_bind(profile_id);
        }
        builder.push(" ORDER BY id");

        let rows: Vec<FeedDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(FeedDbRow::into_feed).collect()
    }

    /// Active feeds due for a refresh.
    ///
    /// `last_fetched_at IS NOT NULL` sorts never-fetched feeds (false = 0)
    /// ahead of everything else; among fetched feeds the stalest goes first.
    pub async fn due_feeds(&self, cutoff: i64, limit: usize) -> Result<Vec<Feed>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM feeds
            WHERE status = 'active'
              AND (last_fetched_at IS NULL OR last_fetched_at <= ?)
            ORDER BY last_fetched_at IS NOT NULL, last_fetched_at ASC, id ASC
            LIMIT ?
        "#
        );
        let rows: Vec<FeedDbRow> = sqlx::query_as(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(cutoff = cutoff, limit = limit, due = rows.len(), "Selected due feeds");
        rows.into_iter().map(FeedDbRow::into_feed).collect()
    }

    // ========================================================================
    // Health Operations
    // ========================================================================

    /// Record a successful fetch.
    ///
    /// Metadata fields that the feed no longer provides keep their cached
    /// value. Status is left alone: leaving `error` needs [`reactivate`](Self::reactivate).
    pub async fn record_success(
        &self,
        feed_id: i64,
        now: i64,
        metadata: &FeedMetadata,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE feeds SET
                last_fetched_at = ?,
                error_count = 0,
                last_error = NULL,
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                site_url = COALESCE(?, site_url),
                image_url = COALESCE(?, image_url)
            WHERE id = ?
        "#,
        )
        .bind(now)
        .bind(&metadata.title)
        .bind(&metadata.description)
        .bind(&metadata.site_url)
        .bind(&metadata.image_url)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(feed_id));
        }
        Ok(())
    }

    /// Record a failed fetch and escalate to `error` at `threshold`.
    ///
    /// The increment and the status transition happen in one statement, so
    /// overlapping runs cannot lose a failure. Right-hand sides see the
    /// pre-update row; `RETURNING` sees the updated one.
    pub async fn record_failure(
        &self,
        feed_id: i64,
        now: i64,
        error: &str,
        threshold: i64,
    ) -> Result<FeedHealth, StoreError> {
        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            UPDATE feeds SET
                last_fetched_at = ?,
                error_count = error_count + 1,
                last_error = ?,
                status = CASE
                    WHEN status = 'active' AND error_count + 1 >= ? THEN 'error'
                    ELSE status
                END
            WHERE id = ?
            RETURNING error_count, status
        "#,
        )
        .bind(now)
        .bind(error)
        .bind(threshold)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        let (error_count, status) = row.ok_or_else(|| not_found(feed_id))?;
        Ok(FeedHealth {
            error_count,
            status: status.parse()?,
        })
    }

    pub async fn set_status(&self, feed_id: i64, status: FeedStatus) -> Result<Feed, StoreError> {
        let sql = format!("UPDATE feeds SET status = ? WHERE id = ? RETURNING {FEED_COLUMNS}");
        let row: Option<FeedDbRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| not_found(feed_id))?.into_feed()
    }

    /// Return a feed to `active`, clearing its error count and last error
    pub async fn reactivate(&self, feed_id: i64) -> Result<Feed, StoreError> {
        let sql = format!(
            "UPDATE feeds SET status = 'active', error_count = 0, last_error = NULL \
             WHERE id = ? RETURNING {FEED_COLUMNS}"
        );
        let row: Option<FeedDbRow> = sqlx::query_as(&sql)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| not_found(feed_id))?.into_feed()
    }
}
