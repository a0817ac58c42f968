//! Releases records now or at their validity start.

use crate::error::PublishError;
use crate::metrics::Metrics;
use crate::publisher::TopicPublisher;
use crate::tracker::{ChangeTracker, ClaimGuard};
use dashmap::DashMap;
use situfeed_core::{BusClient, SituationRecord};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::AbortHandle;
use tracing::{debug, error};

/// What `schedule` did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduled {
    Released,
    Failed,
    Deferred(Duration),
    /// Already published at this version or claimed by another release.
    Skipped,
}

pub struct ReleaseScheduler<B> {
    releaser: Arc<Releaser<B>>,
    pending: Arc<DashMap<String, AbortHandle>>,
}

struct Releaser<B> {
    tracker: Arc<ChangeTracker>,
    publisher: Arc<TopicPublisher<B>>,
    metrics: Arc<Metrics>,
}

impl<B: BusClient> ReleaseScheduler<B> {
    pub fn new(tracker: Arc<ChangeTracker>, publisher: Arc<TopicPublisher<B>>, metrics: Arc<Metrics>) -> Self {
        Self {
            releaser: Arc::new(Releaser {
                tracker,
                publisher,
                metrics,
            }),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Claims `record` and releases it inline when its validity start has
    /// passed, otherwise on a task that sleeps until then.
    pub async fn schedule(&self, record: SituationRecord) -> Scheduled {
        let Some(claim) = self.releaser.tracker.claim(&record) else {
            return Scheduled::Skipped;
        };

        let Some(delay) = delay_until(record.validity_start, OffsetDateTime::now_utc()) else {
            return if self.releaser.release(record, claim).await {
                Scheduled::Released
            } else {
                Scheduled::Failed
            };
        };

        let key = claim.key().to_string();
        debug!(key = %key, delay_secs = delay.as_secs(), "deferring release");
        Metrics::inc(&self.releaser.metrics.records_scheduled);

        let releaser = Arc::clone(&self.releaser);
        let pending = Arc::clone(&self.pending);
        // The entry lock is held until the handle is stored, so the task
        // cannot deregister before it is registered.
        let slot = self.pending.entry(key.clone());
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove(&key);
            releaser.release(record, claim).await;
        });
        slot.insert(task.abort_handle());
        update_gauges(&self.releaser);
        Scheduled::Deferred(delay)
    }

    /// Aborts one deferred release. Its claim is given back.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Aborts every deferred release, used on shutdown.
    pub fn abort_all(&self) -> usize {
        let mut aborted = 0;
        self.pending.retain(|_, handle| {
            handle.abort();
            aborted += 1;
            false
        });
        aborted
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<B: BusClient> Releaser<B> {
    /// Publishes and commits. On failure the claim is dropped and the record
    /// stays untracked, so the next poll offers it again.
    async fn release(&self, record: SituationRecord, claim: ClaimGuard) -> bool {
        let started = tokio::time::Instant::now();
        let outcome = self.publisher.publish(&record).await;
        self.metrics.publish_latency.observe(started.elapsed());

        let released = match outcome {
            Ok(topic) => {
                claim.commit(record.known());
                Metrics::inc(&self.metrics.publishes);
                debug!(id = %record.id, version = %record.version, topic = %topic, "released");
                true
            }
            Err(err) => {
                drop(claim);
                match err {
                    PublishError::Transform(_) => Metrics::inc(&self.metrics.transform_errors),
                    _ => Metrics::inc(&self.metrics.publish_errors),
                }
                error!(id = %record.id, version = %record.version, error = %err, "dropping record");
                false
            }
        };
        update_gauges(self);
        released
    }
}

fn update_gauges<B>(releaser: &Releaser<B>) {
    Metrics::set(&releaser.metrics.tracked_records, releaser.tracker.known_len());
    Metrics::set(&releaser.metrics.scheduled_records, releaser.tracker.scheduled_len());
}

/// Time left until `start`, `None` when it is absent or already passed.
pub fn delay_until(start: Option<OffsetDateTime>, now: OffsetDateTime) -> Option<Duration> {
    let remaining: Duration = (start? - now).try_into().ok()?;
    (!remaining.is_zero()).then_some(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration as TimeDuration;

    #[test]
    fn past_or_missing_start_releases_now() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(delay_until(None, now), None);
        assert_eq!(delay_until(Some(now - TimeDuration::minutes(1)), now), None);
        assert_eq!(delay_until(Some(now), now), None);
    }

    #[test]
    fn future_start_is_delayed() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            delay_until(Some(now + TimeDuration::minutes(5)), now),
            Some(Duration::from_secs(300))
        );
    }
}
