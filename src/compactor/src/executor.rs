//! Batched execution of the ordered trim.
//!
//! A table can hold hundreds of millions of historical rows, so the trim runs
//! as a sequence of bounded batches, each committed on its own. Every
//! committed batch leaves the table in a state that satisfies the retention
//! rules, so a run interrupted between batches loses progress, not
//! correctness.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::predicate::CompactionPredicate;
use crate::retention::TrimMetrics;
use crate::store::{StoreError, VersionStore};
use crate::table::{Height, VersionedTable};

/// Result of one ordered trim run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub batches: usize,
    pub rows_deleted: u64,
    pub duration: Duration,
}

/// Drives [`VersionStore::delete_batch`] until the table is exhausted.
#[derive(Debug, Clone)]
pub struct BatchedCompactor {
    batch_size: Option<usize>,
    retained_height: Option<Height>,
    metrics: TrimMetrics,
}

impl BatchedCompactor {
    /// `batch_size` of `None` (or zero) runs the trim as a single batch.
    pub fn new(batch_size: Option<usize>, retained_height: Option<Height>, metrics: TrimMetrics) -> Self {
        Self {
            batch_size: batch_size.filter(|size| *size > 0),
            retained_height,
            metrics,
        }
    }

    /// Trim `table` below `trim_height`.
    ///
    /// Stops after the first batch that deletes fewer rows than the batch
    /// size. A failing batch aborts the run; batches committed before it stay.
    pub async fn run<S>(
        &self,
        store: &S,
        table: &VersionedTable,
        trim_height: Height,
    ) -> Result<CompactionReport, StoreError>
    where
        S: VersionStore + ?Sized,
    {
        let started = Instant::now();
        let mut predicate = CompactionPredicate::new(trim_height, self.retained_height);
        let mut report = CompactionReport::default();

        loop {
            predicate.restart_group();
            let deleted = store
                .delete_batch(table, &mut predicate, self.batch_size)
                .await?;

            report.batches += 1;
            report.rows_deleted += deleted;
            self.metrics.record_batch(deleted);

            debug!(
                table = %table.name(),
                trim_height,
                batch = report.batches,
                deleted,
                resume_marker = predicate.resume_marker(),
                "Trim batch committed"
            );

            match self.batch_size {
                Some(size) if deleted >= size as u64 => continue,
                _ => break,
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVersionStore;
    use crate::table::{EntityKey, KeyColumn, VersionedRow};

    fn table() -> VersionedTable {
        VersionedTable::new("offer", vec![KeyColumn::integer("id")])
    }

    async fn seeded(rows_per_key: i64, keys: i64) -> InMemoryVersionStore {
        let store = InMemoryVersionStore::new();
        store.create_table(&table()).await;
        for id in 0..keys {
            for height in 0..rows_per_key {
                let latest = height == rows_per_key - 1;
                store
                    .insert("offer", VersionedRow::new(EntityKey::new(id), height, latest))
                    .await
                    .unwrap();
            }
        }
        store
    }

    #[tokio::test]
    async fn test_batches_until_partial_batch() {
        // 4 keys x 10 heights, trim height 8: heights 0..=6 go, 7 is the boundary.
        let store = seeded(10, 4).await;
        let metrics = TrimMetrics::new();
        let compactor = BatchedCompactor::new(Some(5), Some(-1), metrics.clone());

        let report = compactor.run(&store, &table(), 8).await.unwrap();
        assert_eq!(report.rows_deleted, 28);
        // 28 rows in batches of 5: five full batches and one partial.
        assert_eq!(report.batches, 6);
        assert_eq!(metrics.batches_committed(), 6);
        assert_eq!(metrics.rows_deleted(), 28);

        let rows = store.rows("offer").await.unwrap();
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().all(|r| r.height >= 7));
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_one_empty_batch() {
        // 2 keys x 4 heights, trim height 3: heights 0 and 1 go, 4 rows total.
        let store = seeded(4, 2).await;
        let compactor = BatchedCompactor::new(Some(2), Some(-1), TrimMetrics::new());

        let report = compactor.run(&store, &table(), 3).await.unwrap();
        assert_eq!(report.rows_deleted, 4);
        assert_eq!(report.batches, 3);
    }

    #[tokio::test]
    async fn test_unbounded_runs_single_batch() {
        let store = seeded(10, 4).await;
        let compactor = BatchedCompactor::new(None, Some(-1), TrimMetrics::new());

        let report = compactor.run(&store, &table(), 8).await.unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.rows_deleted, 28);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_committed_progress() {
        let store = seeded(10, 4).await;
        store.fail_on_batch(3).await;
        let compactor = BatchedCompactor::new(Some(5), Some(-1), TrimMetrics::new());

        let result = compactor.run(&store, &table(), 8).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        // Two batches of five were committed before the failure.
        assert_eq!(store.rows("offer").await.unwrap().len(), 40 - 10);

        // The next run finishes the job.
        let report = compactor.run(&store, &table(), 8).await.unwrap();
        assert_eq!(report.rows_deleted, 18);
        assert_eq!(store.rows("offer").await.unwrap().len(), 12);
    }
}
