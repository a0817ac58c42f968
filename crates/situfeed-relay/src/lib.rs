#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Poll loop that turns feed snapshots into bus messages.
//!
//! Each cycle fetches one publication, classifies it against what was
//! already published, sends deletion notices for records that vanished and
//! hands new or updated records to the [`ReleaseScheduler`].

pub mod error;
pub mod metrics;
pub mod publisher;
pub mod scheduler;
pub mod tracker;

pub use error::PublishError;
pub use metrics::Metrics;
pub use publisher::TopicPublisher;
pub use scheduler::{ReleaseScheduler, Scheduled};
pub use tracker::{ChangeTracker, Classification, ClaimGuard};

use situfeed_core::{BusClient, FeedSource, FetchError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Counts for one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub records: usize,
    pub new: usize,
    pub updated: usize,
    pub pending: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub deletions_failed: usize,
    pub released: usize,
    pub deferred: usize,
    pub failed: usize,
}

pub struct Relay<S, B> {
    source: S,
    tracker: Arc<ChangeTracker>,
    publisher: Arc<TopicPublisher<B>>,
    scheduler: ReleaseScheduler<B>,
    metrics: Arc<Metrics>,
}

impl<S: FeedSource, B: BusClient> Relay<S, B> {
    pub fn new(source: S, publisher: TopicPublisher<B>, metrics: Arc<Metrics>) -> Self {
        let tracker = ChangeTracker::new();
        let publisher = Arc::new(publisher);
        let scheduler = ReleaseScheduler::new(
            Arc::clone(&tracker),
            Arc::clone(&publisher),
            Arc::clone(&metrics),
        );
        Self {
            source,
            tracker,
            publisher,
            scheduler,
            metrics,
        }
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub fn scheduler(&self) -> &ReleaseScheduler<B> {
        &self.scheduler
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Runs one fetch-classify-release cycle. A failed fetch leaves tracked
    /// state untouched.
    pub async fn poll_cycle(&self) -> Result<PollSummary, FetchError> {
        Metrics::inc(&self.metrics.fetch_attempts);
        let started = tokio::time::Instant::now();
        let fetched = self.source.fetch().await;
        self.metrics.fetch_latency.observe(started.elapsed());

        let publication = match fetched {
            Ok(publication) => publication,
            Err(err) => {
                Metrics::inc(&self.metrics.fetch_errors);
                warn!(error = %err, "feed fetch failed; skipping cycle");
                return Err(err);
            }
        };

        let records = publication.into_records();
        let mut summary = PollSummary {
            records: records.len(),
            ..PollSummary::default()
        };
        Metrics::add(&self.metrics.records_processed, records.len() as u64);

        let mut classification = self.tracker.classify(records);
        summary.new = classification.new.len();
        summary.updated = classification.updated.len();
        summary.pending = classification.pending.len();
        summary.unchanged = classification.unchanged.len();
        summary.deleted = classification.deleted.len();
        Metrics::add(&self.metrics.records_new, summary.new as u64);
        Metrics::add(&self.metrics.records_updated, summary.updated as u64);
        Metrics::add(&self.metrics.records_deleted, summary.deleted as u64);

        let deleted_at = OffsetDateTime::now_utc();
        for known in std::mem::take(&mut classification.deleted) {
            match self.publisher.publish_deletion(&known, deleted_at).await {
                Ok(_) => {
                    self.tracker.retire(&known);
                    Metrics::inc(&self.metrics.deletions);
                }
                Err(err) => {
                    summary.deletions_failed += 1;
                    Metrics::inc(&self.metrics.deletion_errors);
                    warn!(id = %known.id, error = %err, "deletion notice failed; retrying next cycle");
                }
            }
        }

        for record in classification.releasable() {
            match self.scheduler.schedule(record).await {
                Scheduled::Released => summary.released += 1,
                Scheduled::Deferred(_) => summary.deferred += 1,
                Scheduled::Failed => summary.failed += 1,
                Scheduled::Skipped => summary.pending += 1,
            }
        }

        Metrics::set(&self.metrics.tracked_records, self.tracker.known_len());
        Metrics::set(&self.metrics.scheduled_records, self.tracker.scheduled_len());
        info!(
            records = summary.records,
            new = summary.new,
            updated = summary.updated,
            deleted = summary.deleted,
            released = summary.released,
            deferred = summary.deferred,
            failed = summary.failed,
            "poll cycle complete"
        );
        Ok(summary)
    }

    /// Polls every `interval` until `shutdown` resolves, then aborts every
    /// deferred release.
    pub async fn run(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.poll_cycle() => {}
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        let aborted = self.scheduler.abort_all();
        info!(aborted, "relay stopped");
    }
}
