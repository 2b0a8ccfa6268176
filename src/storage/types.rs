use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ingest::ErrorCode;

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by a [`FeedStore`](super::FeedStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (e.g. an item with the same
    /// `(feed_id, guid)` already exists). Not a failure for the ingestion job.
    #[error("Record already exists")]
    Conflict,

    /// The addressed row does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Database migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored value could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Any other persistence failure
    #[error("Database error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Taxonomy code recorded when a store error fails a feed
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::Conflict => ErrorCode::StoreConflict,
            _ => ErrorCode::StoreFailure,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict,
            sqlx::Error::RowNotFound => StoreError::Backend("row not found".to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

// ============================================================================
// Status Enums
// ============================================================================

/// Lifecycle state of a feed.
///
/// `Active` feeds are picked up by the scheduled run. `Error` is entered
/// automatically after too many consecutive failures; `Paused` only by the
/// owner. Both leave only through reactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Active,
    Paused,
    Error,
}

impl FeedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedStatus::Active => "active",
            FeedStatus::Paused => "paused",
            FeedStatus::Error => "error",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FeedStatus::Active),
            "paused" => Ok(FeedStatus::Paused),
            "error" => Ok(FeedStatus::Error),
            other => Err(StoreError::Corrupt(format!("unknown feed status '{other}'"))),
        }
    }
}

/// Processing state of a stored item. Only the auto-share stage moves an
/// item from `New` to `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    New,
    Processed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::New => "new",
            ItemStatus::Processed => "processed",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ItemStatus::New),
            "processed" => Ok(ItemStatus::Processed),
            other => Err(StoreError::Corrupt(format!("unknown item status '{other}'"))),
        }
    }
}

/// How the auto-share stage queued an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    Publish,
    Draft,
}

impl ShareMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ShareMode::Publish => "publish",
            ShareMode::Draft => "draft",
        }
    }

    pub fn for_feed(auto_publish: bool) -> Self {
        if auto_publish {
            ShareMode::Publish
        } else {
            ShareMode::Draft
        }
    }
}

impl FromStr for ShareMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish" => Ok(ShareMode::Publish),
            "draft" => Ok(ShareMode::Draft),
            other => Err(StoreError::Corrupt(format!("unknown share mode '{other}'"))),
        }
    }
}

// ============================================================================
// Input Types
// ============================================================================

/// A feed subscription created by a user action
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub profile_id: String,
    pub url: String,
    pub name: String,
    pub auto_publish: bool,
}

/// One entry normalized by the feed parser, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published: Option<i64>,
    pub categories: Vec<String>,
}

/// Feed-level metadata cached on the feed row after a successful fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub image_url: Option<String>,
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub id: i64,
    pub profile_id: String,
    pub url: String,
    pub name: String,
    pub status: FeedStatus,
    pub last_fetched_at: Option<i64>,
    /// Consecutive failed fetches since the last success
    pub error_count: i64,
    pub last_error: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub image_url: Option<String>,
    pub auto_publish: bool,
    pub created_at: i64,
}

/// Stored feed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    pub id: i64,
    pub feed_id: i64,
    pub profile_id: String,
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<i64>,
    pub categories: Vec<String>,
    pub status: ItemStatus,
    pub created_at: i64,
    pub processed_at: Option<i64>,
}

/// Health fields after a failure was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedHealth {
    pub error_count: i64,
    pub status: FeedStatus,
}

/// Item waiting in the auto-share outbox, joined with its feed's settings
#[derive(Debug, Clone)]
pub struct PendingShare {
    pub item_id: i64,
    pub profile_id: String,
    pub auto_publish: bool,
}

/// Row of the auto-share outbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareQueueEntry {
    pub id: i64,
    pub item_id: i64,
    pub profile_id: String,
    pub mode: ShareMode,
    pub created_at: i64,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub profile_id: String,
    pub url: String,
    pub name: String,
    pub status: String,
    pub last_fetched_at: Option<i64>,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub image_url: Option<String>,
    pub auto_publish: bool,
    pub created_at: i64,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Result<Feed, StoreError> {
        Ok(Feed {
            id: self.id,
            profile_id: self.profile_id,
            url: self.url,
            name: self.name,
            status: self.status.parse()?,
            last_fetched_at: self.last_fetched_at,
            error_count: self.error_count,
            last_error: self.last_error,
            title: self.title,
            description: self.description,
            site_url: self.site_url,
            image_url: self.image_url,
            auto_publish: self.auto_publish,
            created_at: self.created_at,
        })
    }
}

/// Internal row type for item queries. `categories` is stored as a JSON array.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub profile_id: String,
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<i64>,
    pub categories: String,
    pub status: String,
    pub created_at: i64,
    pub processed_at: Option<i64>,
}

impl ItemDbRow {
    pub(crate) fn into_item(self) -> Result<FeedItem, StoreError> {
        Ok(FeedItem {
            id: self.id,
            feed_id: self.feed_id,
            profile_id: self.profile_id,
            guid: self.guid,
            title: self.title,
            link: self.link,
            description: self.description,
            content: self.content,
            author: self.author,
            image_url: self.image_url,
            published_at: self.published_at,
            categories: serde_json::from_str(&self.categories)?,
            status: self.status.parse()?,
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}
