//! Table-level trim service.
//!
//! [`Trimmer`] owns the registered tables, their cached probe results and the
//! trim scheduler. One call to [`Trimmer::trim`] is one trim opportunity:
//! every registered table is offered to the scheduler and, when due, trimmed
//! on the ordered fast path or with the fallback.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor::BatchedCompactor;
use crate::probe::{ScanOrder, ScanOrderProbe};
use crate::retention::{HeightSource, RetentionClock, TrimMetrics, TrimScheduler, TrimSettings};
use crate::store::{FallbackCompactor, StoreError, VersionStore};
use crate::table::{Height, TableDefinitionError, VersionedTable};

#[derive(Error, Debug)]
pub enum TrimError {
    #[error("Table {0} is not registered")]
    UnknownTable(String),

    #[error("Invalid table definition: {0}")]
    InvalidTable(#[from] TableDefinitionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// How a table was trimmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPath {
    /// Batched ordered scan
    Ordered,
    /// Order-independent fallback
    Fallback,
}

/// Result of trimming a single table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTrimResult {
    pub table: String,
    pub path: TrimPath,
    /// The scheduler skipped this opportunity; nothing was scanned.
    pub skipped: bool,
    pub batches: usize,
    pub rows_deleted: u64,
    pub duration: Duration,
}

/// Result of one trim opportunity across all registered tables
#[derive(Debug, Clone)]
pub struct TrimRunResult {
    pub run_id: Uuid,
    pub trim_height: Height,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub table_results: Vec<TableTrimResult>,
    pub errors: Vec<String>,
}

impl TrimRunResult {
    pub fn rows_deleted(&self) -> u64 {
        self.table_results.iter().map(|r| r.rows_deleted).sum()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug)]
struct RegisteredTable {
    table: VersionedTable,
    scan_order: ScanOrder,
    // Serialises runs on the same table. Shared by every registration of
    // the table name.
    running: Arc<Mutex<()>>,
}

/// Trims registered multi-version tables in a backing store.
pub struct Trimmer<S> {
    store: Arc<S>,
    clock: RetentionClock,
    compactor: BatchedCompactor,
    retained_height: Option<Height>,
    metrics: TrimMetrics,
    scheduler: Mutex<TrimScheduler>,
    tables: RwLock<Vec<Arc<RegisteredTable>>>,
}

impl<S> Trimmer<S>
where
    S: VersionStore + FallbackCompactor,
{
    pub fn new(store: Arc<S>, settings: TrimSettings) -> Self {
        Self::with_metrics(store, settings, TrimMetrics::new())
    }

    pub fn with_metrics(store: Arc<S>, settings: TrimSettings, metrics: TrimMetrics) -> Self {
        Self {
            store,
            clock: RetentionClock::new(settings.retention_depth),
            compactor: BatchedCompactor::new(
                settings.batch_size,
                settings.retained_height,
                metrics.clone(),
            ),
            retained_height: settings.retained_height,
            metrics,
            scheduler: Mutex::new(TrimScheduler::new(settings.frequency)),
            tables: RwLock::new(Vec::new()),
        }
    }

    pub fn metrics(&self) -> &TrimMetrics {
        &self.metrics
    }

    /// Register a table and probe it once.
    ///
    /// The probe result is kept for the lifetime of the registration.
    /// Registering a table name again replaces the earlier registration; a
    /// run still in flight on the earlier one keeps later runs waiting.
    pub async fn register(&self, table: VersionedTable) -> Result<ScanOrder, TrimError> {
        table.validate()?;
        let scan_order = ScanOrderProbe::probe(&*self.store, &table).await;

        let mut tables = self.tables.write().await;
        match tables.iter_mut().find(|t| t.table.name() == table.name()) {
            Some(existing) => {
                *existing = Arc::new(RegisteredTable {
                    table,
                    scan_order: scan_order.clone(),
                    running: existing.running.clone(),
                });
            }
            None => tables.push(Arc::new(RegisteredTable {
                table,
                scan_order: scan_order.clone(),
                running: Arc::default(),
            })),
        }

        Ok(scan_order)
    }

    /// Names of registered tables with their cached probe results.
    pub async fn tables(&self) -> Vec<(String, ScanOrder)> {
        self.tables
            .read()
            .await
            .iter()
            .map(|t| (t.table.name().to_string(), t.scan_order.clone()))
            .collect()
    }

    /// Run one trim opportunity at `current_height`.
    pub async fn trim(&self, current_height: Height) -> TrimRunResult {
        self.run(self.clock.trim_height(current_height)).await
    }

    /// Read the current height and rollback depth from `source` and trim.
    pub async fn trim_from(&self, source: &dyn HeightSource) -> Result<TrimRunResult, TrimError> {
        let current_height = source.current_height().await?;
        let clock = RetentionClock::new(source.retention_depth());
        Ok(self.run(clock.trim_height(current_height)).await)
    }

    /// Trim one table below `trim_height`, ignoring the scheduler.
    pub async fn trim_table(
        &self,
        name: &str,
        trim_height: Height,
    ) -> Result<TableTrimResult, TrimError> {
        let entry = self
            .tables
            .read()
            .await
            .iter()
            .find(|t| t.table.name() == name)
            .cloned()
            .ok_or_else(|| TrimError::UnknownTable(name.to_string()))?;

        self.trim_registered(&entry, trim_height).await
    }

    async fn run(&self, trim_height: Height) -> TrimRunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let tables: Vec<Arc<RegisteredTable>> = self.tables.read().await.clone();

        info!(
            run_id = %run_id,
            trim_height,
            tables = tables.len(),
            "Starting trim run"
        );

        let mut table_results = vec![];
        let mut errors = vec![];

        for entry in tables {
            let name = entry.table.name();

            if !self.scheduler.lock().await.should_run(name) {
                debug!(table = %name, "Trim skipped by scheduler");
                self.metrics.record_skipped();
                table_results.push(TableTrimResult {
                    table: name.to_string(),
                    path: path_for(&entry.scan_order),
                    skipped: true,
                    batches: 0,
                    rows_deleted: 0,
                    duration: Duration::ZERO,
                });
                continue;
            }

            match self.trim_registered(&entry, trim_height).await {
                Ok(result) => table_results.push(result),
                Err(e) => {
                    warn!(
                        run_id = %run_id,
                        table = %name,
                        trim_height,
                        error = %e,
                        "Table trim failed"
                    );
                    errors.push(format!("Failed to trim table {name}: {e}"));
                }
            }
        }

        let completed_at = Utc::now();
        let result = TrimRunResult {
            run_id,
            trim_height,
            started_at,
            completed_at,
            table_results,
            errors,
        };

        info!(
            run_id = %run_id,
            trim_height,
            rows_deleted = result.rows_deleted(),
            failed = result.errors.len(),
            duration_ms = (completed_at - started_at).num_milliseconds(),
            "Trim run completed"
        );

        result
    }

    async fn trim_registered(
        &self,
        entry: &RegisteredTable,
        trim_height: Height,
    ) -> Result<TableTrimResult, TrimError> {
        let _running = entry.running.lock().await;
        let table = &entry.table;
        let path = path_for(&entry.scan_order);
        let started = Instant::now();

        let outcome = match path {
            TrimPath::Ordered => self
                .compactor
                .run(&*self.store, table, trim_height)
                .await
                .map(|report| (report.batches, report.rows_deleted)),
            TrimPath::Fallback => self
                .store
                .trim(table, trim_height, self.retained_height)
                .await
                .map(|deleted| {
                    self.metrics.record_batch(deleted);
                    (1, deleted)
                }),
        };

        let duration = started.elapsed();
        self.metrics.record_duration(duration);

        let (batches, rows_deleted) = match outcome {
            Ok(counts) => counts,
            Err(e) => {
                self.metrics.record_failure();
                return Err(e.into());
            }
        };

        match path {
            TrimPath::Ordered => self.metrics.record_ordered_run(),
            TrimPath::Fallback => self.metrics.record_fallback_run(),
        }

        info!(
            table = %table.name(),
            trim_height,
            path = ?path,
            batches,
            rows_deleted,
            duration_ms = duration.as_millis() as u64,
            "Table trimmed"
        );

        Ok(TableTrimResult {
            table: table.name().to_string(),
            path,
            skipped: false,
            batches,
            rows_deleted,
            duration,
        })
    }
}

fn path_for(scan_order: &ScanOrder) -> TrimPath {
    if scan_order.is_available() {
        TrimPath::Ordered
    } else {
        TrimPath::Fallback
    }
}
