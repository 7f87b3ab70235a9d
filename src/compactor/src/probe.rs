//! Capability probe for the ordered trim.
//!
//! The ordered trim needs the store to deliver rows by `(key ascending,
//! height descending)` and to restart a scan at a leading key value. Both are
//! only cheap when a matching index exists and the leading key column is a
//! 64-bit integer. The probe never fails: every problem degrades the table to
//! the fallback trim and is logged with its cause.

use thiserror::Error;
use tracing::{info, warn};

use crate::store::{IndexCatalog, IndexInfo};
use crate::table::{ColumnType, VersionedTable};

/// Why the ordered trim is not available for a table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanOrderMismatch {
    #[error("table has no key columns")]
    NoKeyColumns,

    #[error("index catalog could not be read: {0}")]
    CatalogUnavailable(String),

    #[error("column {0} does not exist")]
    MissingColumn(String),

    #[error("leading key column {column} is {found}, not a 64-bit integer")]
    LeadingColumnNotInteger { column: String, found: ColumnType },

    #[error("no index starts with {0} ascending")]
    NoCandidateIndex(String),

    #[error("{} indexes start with {column} ascending: {}", indexes.len(), indexes.join(", "))]
    AmbiguousIndex { column: String, indexes: Vec<String> },

    #[error("index {index} has {found:?} at position {position}, expected {expected}")]
    KeyColumnMismatch {
        index: String,
        position: usize,
        expected: String,
        found: Option<String>,
    },

    #[error("index {index} orders key column {column} descending")]
    KeyColumnDescending { index: String, column: String },

    #[error("index {index} is not followed by height column {column}")]
    MissingHeightColumn { index: String, column: String },

    #[error("index {index} orders height column {column} ascending")]
    HeightNotDescending { index: String, column: String },
}

/// Outcome of probing a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOrder {
    /// The ordered trim can use this index.
    Available { index: String },
    /// The fallback trim must be used.
    Unavailable(ScanOrderMismatch),
}

impl ScanOrder {
    pub fn is_available(&self) -> bool {
        matches!(self, ScanOrder::Available { .. })
    }
}

/// Checks a table's indexes against the ordered trim's requirements.
pub struct ScanOrderProbe;

impl ScanOrderProbe {
    /// Probe a table. Logs the cause when the ordered trim is unavailable.
    pub async fn probe(catalog: &dyn IndexCatalog, table: &VersionedTable) -> ScanOrder {
        let result = match Self::check(catalog, table).await {
            Ok(index) => ScanOrder::Available { index },
            Err(mismatch) => ScanOrder::Unavailable(mismatch),
        };

        match &result {
            ScanOrder::Available { index } => info!(
                table = %table.name(),
                index = %index,
                "Ordered trim available"
            ),
            ScanOrder::Unavailable(mismatch) => warn!(
                table = %table.name(),
                reason = %mismatch,
                "Ordered trim unavailable, falling back to unordered trim"
            ),
        }

        result
    }

    async fn check(
        catalog: &dyn IndexCatalog,
        table: &VersionedTable,
    ) -> Result<String, ScanOrderMismatch> {
        let leading = &table
            .key_columns()
            .first()
            .ok_or(ScanOrderMismatch::NoKeyColumns)?
            .name;

        let column_type = catalog
            .column_type(table.name(), leading)
            .await
            .map_err(|e| ScanOrderMismatch::CatalogUnavailable(e.to_string()))?
            .ok_or_else(|| ScanOrderMismatch::MissingColumn(leading.clone()))?;

        if column_type != ColumnType::Integer {
            return Err(ScanOrderMismatch::LeadingColumnNotInteger {
                column: leading.clone(),
                found: column_type,
            });
        }

        let indexes = catalog
            .indexes(table.name())
            .await
            .map_err(|e| ScanOrderMismatch::CatalogUnavailable(e.to_string()))?;

        let mut candidates: Vec<&IndexInfo> = indexes
            .iter()
            .filter(|index| {
                index
                    .columns
                    .first()
                    .is_some_and(|c| &c.name == leading && !c.descending)
            })
            .collect();

        let index = match candidates.len() {
            0 => return Err(ScanOrderMismatch::NoCandidateIndex(leading.clone())),
            1 => candidates.remove(0),
            _ => {
                return Err(ScanOrderMismatch::AmbiguousIndex {
                    column: leading.clone(),
                    indexes: candidates.iter().map(|i| i.name.clone()).collect(),
                });
            }
        };

        Self::check_column_order(index, table)?;
        Ok(index.name.clone())
    }

    fn check_column_order(
        index: &IndexInfo,
        table: &VersionedTable,
    ) -> Result<(), ScanOrderMismatch> {
        for (position, key) in table.key_columns().iter().enumerate().skip(1) {
            let column = index.columns.get(position);
            if column.map(|c| &c.name) != Some(&key.name) {
                return Err(ScanOrderMismatch::KeyColumnMismatch {
                    index: index.name.clone(),
                    position,
                    expected: key.name.clone(),
                    found: column.map(|c| c.name.clone()),
                });
            }
            if column.is_some_and(|c| c.descending) {
                return Err(ScanOrderMismatch::KeyColumnDescending {
                    index: index.name.clone(),
                    column: key.name.clone(),
                });
            }
        }

        // Columns after the height column cannot disturb the required order.
        match index.columns.get(table.key_columns().len()) {
            Some(c) if c.name == table.height_column() && c.descending => Ok(()),
            Some(c) if c.name == table.height_column() => {
                Err(ScanOrderMismatch::HeightNotDescending {
                    index: index.name.clone(),
                    column: c.name.clone(),
                })
            }
            _ => Err(ScanOrderMismatch::MissingHeightColumn {
                index: index.name.clone(),
                column: table.height_column().to_string(),
            }),
        }
    }
}
