//! Auto-share stage invoked after a run that created new items.
//!
//! The pipeline only knows the [`AutoShare`] trait. [`QueueAutoShare`] is the
//! built-in implementation: it moves every `new` item into the
//! `share_queue` outbox, where an external publisher picks it up.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::storage::{Database, ShareMode, StoreError};

/// Per-run counts reported back by the share stage
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShareSummary {
    pub published: usize,
    pub drafted: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Share stage storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Share stage failed: {0}")]
    Downstream(String),
}

#[async_trait]
pub trait AutoShare: Send + Sync {
    /// Process every item not yet handed to the share stage.
    async fn share_new_items(&self) -> Result<ShareSummary, ShareError>;
}

/// Outbox-backed [`AutoShare`].
///
/// Items of feeds with `auto_publish` are queued as `publish`, the rest as
/// `draft`. A per-item failure is counted and the item stays `new` for the
/// next run.
pub struct QueueAutoShare {
    db: Database,
    batch_size: usize,
}

impl QueueAutoShare {
    const DEFAULT_BATCH: usize = 500;

    pub fn new(db: Database) -> Self {
        Self {
            db,
            batch_size: Self::DEFAULT_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl AutoShare for QueueAutoShare {
    async fn share_new_items(&self) -> Result<ShareSummary, ShareError> {
        let now = chrono::Utc::now().timestamp();
        let pending = self.db.pending_shares(self.batch_size).await?;
        let mut summary = ShareSummary::default();

        for share in pending {
            let mode = ShareMode::for_feed(share.auto_publish);
            match self
                .db
                .enqueue_share(share.item_id, &share.profile_id, mode, now)
                .await
            {
                Ok(true) => match mode {
                    ShareMode::Publish => summary.published += 1,
                    ShareMode::Draft => summary.drafted += 1,
                },
                // Already taken by a concurrent run
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(item_id = share.item_id, error = %e, "Failed to queue item for sharing");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            published = summary.published,
            drafted = summary.drafted,
            failed = summary.failed,
            "Auto-share stage finished"
        );
        Ok(summary)
    }
}
