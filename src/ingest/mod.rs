//! The scheduled ingestion pipeline.
//!
//! A run selects due feeds ([`selector`]), fetches each one, writes new
//! items ([`writer`]), records the outcome on the feed ([`health`]) and, if
//! anything new arrived, hands over to the auto-share stage ([`share`]).
//! [`Ingestor`] ties these together and also serves the per-feed owner
//! actions (manual refresh, pause, reactivation, subscription).

pub mod health;
mod orchestrator;
pub mod selector;
pub mod share;
pub mod writer;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::storage::StoreError;
use crate::util::UrlValidationError;

pub use orchestrator::{FeedOutcome, FeedResult, IngestReport, Ingestor, ShareReport};
pub use share::{AutoShare, QueueAutoShare, ShareError, ShareSummary};
pub use writer::WriteSummary;

/// Failure classification stored in `last_error` and reported per feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidUrl,
    FetchFailed,
    Timeout,
    InvalidFeed,
    StoreConflict,
    StoreFailure,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::FetchFailed => "FETCH_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InvalidFeed => "INVALID_FEED",
            ErrorCode::StoreConflict => "STORE_CONFLICT",
            ErrorCode::StoreFailure => "STORE_FAILURE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to the caller of an [`Ingestor`] operation.
///
/// Per-feed fetch failures are not errors at this level; they end up in the
/// [`IngestReport`] instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Feed {0} not found")]
    FeedNotFound(i64),

    #[error("Feed {feed_id} is not owned by profile {profile_id}")]
    NotOwner { feed_id: i64, profile_id: String },

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Profile {profile_id} is already subscribed to {url}")]
    AlreadySubscribed { profile_id: String, url: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_strings() {
        assert_eq!(ErrorCode::InvalidUrl.as_str(), "INVALID_URL");
        assert_eq!(ErrorCode::StoreFailure.to_string(), "STORE_FAILURE");
        assert_eq!(
            serde_json::to_string(&ErrorCode::FetchFailed).unwrap(),
            "\"FETCH_FAILED\""
        );
    }

    #[test]
    fn test_store_error_codes() {
        assert_eq!(StoreError::Conflict.code(), ErrorCode::StoreConflict);
        assert_eq!(
            StoreError::Backend("disk full".to_string()).code(),
            ErrorCode::StoreFailure
        );
    }
}
