use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::feed::FeedFetcher;
use crate::ingest::share::{AutoShare, ShareSummary};
use crate::ingest::{health, selector, writer, ErrorCode, IngestError};
use crate::storage::{Feed, FeedStatus, FeedStore, NewFeed, StoreError};
use crate::util::validate_feed_url;

/// Result of processing one feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedOutcome {
    pub feed_id: i64,
    pub url: String,
    #[serde(flatten)]
    pub result: FeedResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FeedResult {
    Success { created: usize, skipped: usize },
    Failed { code: ErrorCode, message: String },
}

impl FeedOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, FeedResult::Success { .. })
    }
}

/// What happened in the auto-share stage, if it ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ShareReport {
    Completed(ShareSummary),
    Failed { message: String },
}

/// Summary of one scheduled run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub items_created: usize,
    pub items_skipped: usize,
    pub feeds: Vec<FeedOutcome>,
    /// `None` when no item was created and the stage was not invoked
    pub share: Option<ShareReport>,
}

impl IngestReport {
    fn push(&mut self, outcome: FeedOutcome) {
        self.processed += 1;
        match &outcome.result {
            FeedResult::Success { created, skipped } => {
                self.successful += 1;
                self.items_created += created;
                self.items_skipped += skipped;
            }
            FeedResult::Failed { .. } => self.failed += 1,
        }
        self.feeds.push(outcome);
    }
}

/// Drives scheduled runs and per-feed owner actions.
pub struct Ingestor {
    store: Arc<dyn FeedStore>,
    fetcher: FeedFetcher,
    config: Config,
    share: Option<Arc<dyn AutoShare>>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn FeedStore>, fetcher: FeedFetcher, config: Config) -> Self {
        Self {
            store,
            fetcher,
            config,
            share: None,
        }
    }

    /// Stage to invoke after a run that created items
    pub fn with_auto_share(mut self, share: Arc<dyn AutoShare>) -> Self {
        self.share = Some(share);
        self
    }

    pub async fn run(&self) -> Result<IngestReport, IngestError> {
        self.run_at(chrono::Utc::now().timestamp()).await
    }

    /// One scheduled run evaluated at `now` (unix seconds).
    ///
    /// Only feed selection can fail the run as a whole. Each feed's failure
    /// is recorded on the feed and in the report, and the auto-share
    /// stage's failure is reported without affecting the counts.
    pub async fn run_at(&self, now: i64) -> Result<IngestReport, IngestError> {
        let feeds = selector::select_due_feeds(self.store.as_ref(), now, &self.config).await?;
        tracing::info!(due = feeds.len(), "Starting ingestion run");

        let outcomes: Vec<FeedOutcome> = stream::iter(feeds)
            .map(|feed| async move { self.process_feed(&feed, now).await })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = IngestReport::default();
        for outcome in outcomes {
            report.push(outcome);
        }

        if report.items_created > 0 {
            if let Some(share) = &self.share {
                report.share = Some(match share.share_new_items().await {
                    Ok(summary) => ShareReport::Completed(summary),
                    Err(e) => {
                        tracing::error!(error = %e, "Auto-share stage failed");
                        ShareReport::Failed {
                            message: e.to_string(),
                        }
                    }
                });
            }
        }

        tracing::info!(
            processed = report.processed,
            successful = report.successful,
            failed = report.failed,
            items_created = report.items_created,
            items_skipped = report.items_skipped,
            "Ingestion run finished"
        );
        Ok(report)
    }

    /// Fetch one feed now, ignoring its status and refetch interval.
    ///
    /// Does not invoke the auto-share stage; new items wait for the next
    /// scheduled run.
    pub async fn refresh_feed(
        &self,
        feed_id: i64,
        profile_id: &str,
    ) -> Result<FeedOutcome, IngestError> {
        let feed = self.owned_feed(feed_id, profile_id).await?;
        Ok(self
            .process_feed(&feed, chrono::Utc::now().timestamp())
            .await)
    }

    pub async fn reactivate_feed(&self, feed_id: i64, profile_id: &str) -> Result<Feed, IngestError> {
        self.owned_feed(feed_id, profile_id).await?;
        Ok(health::reactivate(self.store.as_ref(), feed_id).await?)
    }

    pub async fn pause_feed(&self, feed_id: i64, profile_id: &str) -> Result<Feed, IngestError> {
        self.owned_feed(feed_id, profile_id).await?;
        let feed = self.store.set_status(feed_id, FeedStatus::Paused).await?;
        tracing::info!(feed_id, "Feed paused");
        Ok(feed)
    }

    /// Subscribe `profile_id` to the feed at `url`.
    ///
    /// The URL is checked with the same rules the fetcher applies and stored
    /// in normalized form. An empty name falls back to the URL's host.
    pub async fn add_feed(
        &self,
        profile_id: &str,
        url: &str,
        name: &str,
        auto_publish: bool,
    ) -> Result<Feed, IngestError> {
        let parsed = validate_feed_url(url, self.config.allow_private_hosts)?;
        let name = match name.trim() {
            "" => parsed.host_str().unwrap_or_default().to_string(),
            trimmed => trimmed.to_string(),
        };

        let new_feed = NewFeed {
            profile_id: profile_id.to_string(),
            url: parsed.to_string(),
            name,
            auto_publish,
        };

        match self
            .store
            .insert_feed(&new_feed, chrono::Utc::now().timestamp())
            .await
        {
            Ok(feed) => {
                tracing::info!(feed_id = feed.id, url = %feed.url, "Feed added");
                Ok(feed)
            }
            Err(StoreError::Conflict) => Err(IngestError::AlreadySubscribed {
                profile_id: new_feed.profile_id,
                url: new_feed.url,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn owned_feed(&self, feed_id: i64, profile_id: &str) -> Result<Feed, IngestError> {
        let feed = self
            .store
            .find_feed(feed_id)
            .await?
            .ok_or(IngestError::FeedNotFound(feed_id))?;

        if feed.profile_id != profile_id {
            return Err(IngestError::NotOwner {
                feed_id,
                profile_id: profile_id.to_string(),
            });
        }
        Ok(feed)
    }

    /// fetch → write → health. Never fails; problems become a failed outcome.
    async fn process_feed(&self, feed: &Feed, now: i64) -> FeedOutcome {
        let result = match self.ingest_feed(feed, now).await {
            Ok(summary) => {
                tracing::debug!(
                    feed_id = feed.id,
                    created = summary.created,
                    skipped = summary.skipped,
                    "Feed ingested"
                );
                FeedResult::Success {
                    created: summary.created,
                    skipped: summary.skipped,
                }
            }
            Err((code, message)) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, code = %code, error = %message, "Feed ingestion failed");
                if let Err(e) = health::record_failure(
                    self.store.as_ref(),
                    feed.id,
                    now,
                    code,
                    &message,
                    self.config.error_threshold,
                )
                .await
                {
                    tracing::error!(feed_id = feed.id, error = %e, "Failed to record feed failure");
                }
                FeedResult::Failed { code, message }
            }
        };

        FeedOutcome {
            feed_id: feed.id,
            url: feed.url.clone(),
            result,
        }
    }

    async fn ingest_feed(
        &self,
        feed: &Feed,
        now: i64,
    ) -> Result<writer::WriteSummary, (ErrorCode, String)> {
        let parsed = self
            .fetcher
            .fetch(&feed.url)
            .await
            .map_err(|e| (e.code(), e.to_string()))?;

        let store = self.store.as_ref();
        let summary = writer::write_items(store, feed, &parsed.items, now)
            .await
            .map_err(|e| (e.code(), e.to_string()))?;

        health::record_success(store, feed, now, &parsed.metadata())
            .await
            .map_err(|e| (e.code(), e.to_string()))?;

        Ok(summary)
    }
}
