use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed store for feeds, items and the share outbox.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database. It is limited to a
    /// single pooled connection, since every SQLite connection to `:memory:`
    /// sees its own empty database.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        // busy_timeout=5000: overlapping scheduled runs wait for the writer
        // lock instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .acquire_timeout(Duration::from_secs(10));
        if in_memory {
            // Dropping the last connection would drop the database with it
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options.connect_with(options).await?;
        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                profile_id TEXT NOT NULL,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'paused', 'error')),
                last_fetched_at INTEGER,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                title TEXT,
                description TEXT,
                site_url TEXT,
                image_url TEXT,
                auto_publish INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE(profile_id, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_items (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                profile_id TEXT NOT NULL,
                guid TEXT NOT NULL,
                title TEXT,
                link TEXT,
                description TEXT,
                content TEXT,
                author TEXT,
                image_url TEXT,
                published_at INTEGER,
                categories TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'new'
                    CHECK (status IN ('new', 'processed')),
                created_at INTEGER NOT NULL,
                processed_at INTEGER,
                UNIQUE(feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS share_queue (
                id INTEGER PRIMARY KEY,
                item_id INTEGER NOT NULL UNIQUE REFERENCES feed_items(id) ON DELETE CASCADE,
                profile_id TEXT NOT NULL,
                mode TEXT NOT NULL CHECK (mode IN ('publish', 'draft')),
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Selector: WHERE status = 'active' ORDER BY last_fetched_at
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_status_fetched ON feeds(status, last_fetched_at)",
        )
        .execute(&mut *tx)
        .await?;

        // Profile lookups use the UNIQUE(profile_id, url) index
        sqlx::query("DROP INDEX IF EXISTS idx_feeds_profile")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feed_items_feed_published ON feed_items(feed_id, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Partial index for the auto-share scan over unprocessed items
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feed_items_new ON feed_items(created_at) WHERE status = 'new'",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_creates_tables() {
        let db = Database::open(":memory:").await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();

        assert_eq!(names, vec!["feed_items", "feeds", "share_queue"]);
    }

    #[tokio::test]
    async fn test_only_needed_indexes_created() {
        let db = Database::open(":memory:").await.unwrap();

        let indexes: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<_> = indexes.into_iter().map(|(n,)| n).collect();

        assert_eq!(
            names,
            vec![
                "idx_feed_items_feed_published",
                "idx_feed_items_new",
                "idx_feeds_status_fetched",
            ]
        );
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = std::env::temp_dir().join(format!("feedrelay_schema_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relay.db");

        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        drop(db);
        // Reopening an existing file runs the migrations again without error
        Database::open(path.to_str().unwrap()).await.unwrap();

        std::fs::remove_dir_all(&dir).ok();
    }
}
