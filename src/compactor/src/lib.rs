//! LedgerDB Compactor Library
//!
//! Trims obsolete history from multi-version entity tables.
//!
//! Every row of a versioned table is one version of an entity, stamped with
//! the chain height that wrote it. Rows older than the rollback window are
//! only needed while they are the newest value of their entity below that
//! window; everything else can go. This crate provides:
//! - The retention clock and per-table trim scheduling
//! - A probe deciding whether a table can be trimmed with an ordered scan
//! - The streaming compaction predicate and its batched executor
//! - An order-independent fallback trim
//! - SQLite and in-memory backing stores

pub mod executor;
pub mod predicate;
pub mod probe;
pub mod retention;
pub mod service;
pub mod store;
pub mod table;

// Re-export commonly used types
pub use executor::{BatchedCompactor, CompactionReport};
pub use predicate::CompactionPredicate;
pub use probe::{ScanOrder, ScanOrderMismatch, ScanOrderProbe};
pub use retention::{RetentionClock, TrimMetrics, TrimScheduler, TrimSettings};
pub use service::{TableTrimResult, TrimError, TrimPath, TrimRunResult, Trimmer};
pub use store::{
    FallbackCompactor, InMemoryVersionStore, SqliteVersionStore, StoreError, VersionStore,
};
pub use table::{EntityKey, Height, KeyColumn, KeyValue, VersionedRow, VersionedTable};
