//! Trim Metrics
//!
//! Thread-safe metrics for monitoring trim runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Thread-safe metrics for tracking trim runs
#[derive(Debug, Clone)]
pub struct TrimMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Table trims run with the ordered scan
    ordered_runs: AtomicUsize,
    /// Table trims run with the fallback
    fallback_runs: AtomicUsize,
    /// Opportunities skipped by the scheduler
    runs_skipped: AtomicUsize,
    /// Table trims that failed
    runs_failed: AtomicUsize,
    /// Committed batches
    batches_committed: AtomicUsize,
    /// Rows deleted
    rows_deleted: AtomicU64,
    /// Total duration in milliseconds
    total_duration_ms: AtomicU64,
}

impl Default for TrimMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TrimMetrics {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                ordered_runs: AtomicUsize::new(0),
                fallback_runs: AtomicUsize::new(0),
                runs_skipped: AtomicUsize::new(0),
                runs_failed: AtomicUsize::new(0),
                batches_committed: AtomicUsize::new(0),
                rows_deleted: AtomicU64::new(0),
                total_duration_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_ordered_run(&self) {
        self.inner.ordered_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_run(&self) {
        self.inner.fallback_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.inner.runs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one committed batch and the rows it deleted
    pub fn record_batch(&self, rows_deleted: u64) {
        self.inner.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .rows_deleted
            .fetch_add(rows_deleted, Ordering::Relaxed);
    }

    pub fn record_duration(&self, duration: Duration) {
        self.inner
            .total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn ordered_runs(&self) -> usize {
        self.inner.ordered_runs.load(Ordering::Relaxed)
    }

    pub fn fallback_runs(&self) -> usize {
        self.inner.fallback_runs.load(Ordering::Relaxed)
    }

    pub fn runs_skipped(&self) -> usize {
        self.inner.runs_skipped.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> usize {
        self.inner.runs_failed.load(Ordering::Relaxed)
    }

    pub fn batches_committed(&self) -> usize {
        self.inner.batches_committed.load(Ordering::Relaxed)
    }

    pub fn rows_deleted(&self) -> u64 {
        self.inner.rows_deleted.load(Ordering::Relaxed)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.inner.total_duration_ms.load(Ordering::Relaxed)
    }

    /// Get a point-in-time summary
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            ordered_runs: self.ordered_runs(),
            fallback_runs: self.fallback_runs(),
            runs_skipped: self.runs_skipped(),
            runs_failed: self.runs_failed(),
            batches_committed: self.batches_committed(),
            rows_deleted: self.rows_deleted(),
            total_duration_ms: self.total_duration_ms(),
        }
    }
}

/// Snapshot of [`TrimMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub ordered_runs: usize,
    pub fallback_runs: usize,
    pub runs_skipped: usize,
    pub runs_failed: usize,
    pub batches_committed: usize,
    pub rows_deleted: u64,
    pub total_duration_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        log::info!(
            "Trim metrics: ordered_runs={}, fallback_runs={}, skipped={}, failed={}, batches={}, rows_deleted={}, duration={}ms",
            self.ordered_runs,
            self.fallback_runs,
            self.runs_skipped,
            self.runs_failed,
            self.batches_committed,
            self.rows_deleted,
            self.total_duration_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = TrimMetrics::new();
        assert_eq!(metrics.ordered_runs(), 0);
        assert_eq!(metrics.batches_committed(), 0);
        assert_eq!(metrics.rows_deleted(), 0);
    }

    #[test]
    fn test_metrics_increment() {
        let metrics = TrimMetrics::new();

        metrics.record_ordered_run();
        metrics.record_fallback_run();
        metrics.record_skipped();
        metrics.record_failure();
        metrics.record_batch(100);
        metrics.record_batch(42);
        metrics.record_duration(Duration::from_millis(1500));

        assert_eq!(
            metrics.summary(),
            MetricsSummary {
                ordered_runs: 1,
                fallback_runs: 1,
                runs_skipped: 1,
                runs_failed: 1,
                batches_committed: 2,
                rows_deleted: 142,
                total_duration_ms: 1500,
            }
        );
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = TrimMetrics::new();
        let clone = metrics.clone();
        clone.record_batch(5);
        assert_eq!(metrics.rows_deleted(), 5);
    }
}
