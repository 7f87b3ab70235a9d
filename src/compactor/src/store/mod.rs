//! Storage seam for the trim engine.
//!
//! The engine needs three things from a backing store: a view of the index
//! catalog to decide whether the ordered fast path is usable, a bounded
//! delete driven by the [`CompactionPredicate`], and an order-independent
//! fallback trim for tables that cannot be scanned in order.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::predicate::CompactionPredicate;
use crate::table::{ColumnType, Height, TableDefinitionError, VersionedTable};

pub use memory::InMemoryVersionStore;
pub use sqlite::{SqlHeightSource, SqliteVersionStore};

/// Errors raised by a backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid table definition: {0}")]
    InvalidTable(#[from] TableDefinitionError),

    #[error("Unknown table {0}")]
    UnknownTable(String),

    #[error("Table {table}: leading key column {column} is not a 64-bit integer")]
    NonIntegerLeadingKey { table: String, column: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// One column of an index, in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    pub descending: bool,
}

impl IndexColumn {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descending: false,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descending: true,
        }
    }
}

/// An index that covers every row of its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<IndexColumn>,
}

impl IndexInfo {
    pub fn new(name: impl Into<String>, columns: Vec<IndexColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// Read access to the store's schema catalog.
#[async_trait]
pub trait IndexCatalog: Send + Sync {
    /// Stored type of a column, `None` when the table or column does not exist.
    async fn column_type(&self, table: &str, column: &str)
    -> Result<Option<ColumnType>, StoreError>;

    /// Full (non-partial) indexes defined on a table.
    async fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, StoreError>;
}

/// A store holding multi-version tables.
#[async_trait]
pub trait VersionStore: IndexCatalog {
    /// Run one committed batch of the ordered trim.
    ///
    /// Rows whose leading key is at least `predicate.resume_marker()` are fed
    /// to the predicate in `(key ascending, height descending)` order until
    /// `limit` rows were selected for deletion or the table is exhausted. The
    /// selected rows are deleted and the batch is committed in one
    /// transaction. Returns the number of rows deleted; on error nothing of
    /// this batch is committed.
    async fn delete_batch(
        &self,
        table: &VersionedTable,
        predicate: &mut CompactionPredicate,
        limit: Option<usize>,
    ) -> Result<u64, StoreError>;
}

/// Order-independent trim used when the ordered scan is not available. Must
/// retain exactly the rows the ordered trim retains.
#[async_trait]
pub trait FallbackCompactor: Send + Sync {
    async fn trim(
        &self,
        table: &VersionedTable,
        trim_height: Height,
        retained_height: Option<Height>,
    ) -> Result<u64, StoreError>;
}
