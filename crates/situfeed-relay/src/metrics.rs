//! Lock-free relay metrics rendered in the Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const PREFIX: &str = "situfeed";

/// Latency accumulator: observation count, total and maximum, in microseconds.
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    sum_us: AtomicU64,
    max_us: AtomicU64,
}

impl Timer {
    pub fn observe(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_us.load(Ordering::Relaxed))
    }

    fn render(&self, out: &mut String, name: &str, help: &str) {
        let seconds = |us: u64| us as f64 / 1_000_000.0;
        let _ = writeln!(out, "# HELP {PREFIX}_{name}_seconds {help}");
        let _ = writeln!(out, "# TYPE {PREFIX}_{name}_seconds summary");
        let _ = writeln!(
            out,
            "{PREFIX}_{name}_seconds_sum {}",
            seconds(self.sum_us.load(Ordering::Relaxed))
        );
        let _ = writeln!(out, "{PREFIX}_{name}_seconds_count {}", self.count());
        let _ = writeln!(out, "# TYPE {PREFIX}_{name}_seconds_max gauge");
        let _ = writeln!(
            out,
            "{PREFIX}_{name}_seconds_max {}",
            seconds(self.max_us.load(Ordering::Relaxed))
        );
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    pub fetch_attempts: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub records_processed: AtomicU64,
    pub publishes: AtomicU64,
    pub publish_errors: AtomicU64,
    pub transform_errors: AtomicU64,
    pub deletions: AtomicU64,
    pub deletion_errors: AtomicU64,
    pub records_new: AtomicU64,
    pub records_updated: AtomicU64,
    pub records_deleted: AtomicU64,
    pub records_scheduled: AtomicU64,
    pub tracked_records: AtomicU64,
    pub scheduled_records: AtomicU64,
    pub fetch_latency: Timer,
    pub publish_latency: Timer,
}

impl Metrics {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(gauge: &AtomicU64, value: usize) {
        gauge.store(value as u64, Ordering::Relaxed);
    }

    pub fn get(value: &AtomicU64) -> u64 {
        value.load(Ordering::Relaxed)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let counters = [
            ("fetch_attempts_total", "Feed fetches started", &self.fetch_attempts),
            ("fetch_errors_total", "Feed fetches that failed", &self.fetch_errors),
            ("records_processed_total", "Records seen in successful fetches", &self.records_processed),
            ("publishes_total", "Records published", &self.publishes),
            ("publish_errors_total", "Record publishes that failed", &self.publish_errors),
            ("transform_errors_total", "Records that could not be transformed", &self.transform_errors),
            ("deletions_total", "Deletion notices published", &self.deletions),
            ("deletion_errors_total", "Deletion notices that failed", &self.deletion_errors),
            ("records_new_total", "Records classified as new", &self.records_new),
            ("records_updated_total", "Records classified as updated", &self.records_updated),
            ("records_deleted_total", "Records inferred as deleted", &self.records_deleted),
            ("records_scheduled_total", "Releases deferred to a later time", &self.records_scheduled),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {PREFIX}_{name} {help}");
            let _ = writeln!(out, "# TYPE {PREFIX}_{name} counter");
            let _ = writeln!(out, "{PREFIX}_{name} {}", Self::get(value));
        }

        let gauges = [
            ("tracked_records", "Records currently tracked as published", &self.tracked_records),
            ("scheduled_records", "Releases currently claimed", &self.scheduled_records),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {PREFIX}_{name} {help}");
            let _ = writeln!(out, "# TYPE {PREFIX}_{name} gauge");
            let _ = writeln!(out, "{PREFIX}_{name} {}", Self::get(value));
        }

        self.fetch_latency.render(&mut out, "fetch", "Feed fetch latency");
        self.publish_latency.render(&mut out, "publish", "Bus publish latency");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_tracks_count_and_max() {
        let timer = Timer::default();
        timer.observe(Duration::from_millis(5));
        timer.observe(Duration::from_millis(20));
        timer.observe(Duration::from_millis(1));
        assert_eq!(timer.count(), 3);
        assert_eq!(timer.max(), Duration::from_millis(20));
    }

    #[test]
    fn render_emits_prometheus_text() {
        let metrics = Metrics::default();
        Metrics::add(&metrics.publishes, 3);
        Metrics::set(&metrics.tracked_records, 7);
        metrics.publish_latency.observe(Duration::from_millis(250));

        let text = metrics.render();
        assert!(text.contains("# TYPE situfeed_publishes_total counter\nsitufeed_publishes_total 3\n"));
        assert!(text.contains("situfeed_tracked_records 7\n"));
        assert!(text.contains("situfeed_publish_seconds_sum 0.25\n"));
        assert!(text.contains("situfeed_publish_seconds_count 1\n"));
        assert!(text.contains("situfeed_fetch_seconds_count 0\n"));
    }
}
