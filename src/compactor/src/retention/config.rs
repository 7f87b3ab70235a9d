//! Validated trim settings.

use common::config::TrimConfig;
use std::collections::HashMap;
use thiserror::Error;

use crate::table::{Height, TableDefinitionError, VersionedTable};

/// Trim engine settings derived from [`TrimConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrimSettings {
    /// Maximum rollback depth; history newer than this many blocks is kept.
    pub retention_depth: Height,
    /// Rows deleted per committed batch, `None` for a single batch.
    pub batch_size: Option<usize>,
    /// Height that is never trimmed.
    pub retained_height: Option<Height>,
    /// Per-table trim frequency multipliers.
    pub frequency: HashMap<String, u32>,
}

impl Default for TrimSettings {
    fn default() -> Self {
        Self {
            retention_depth: 800,
            batch_size: Some(1000),
            retained_height: Some(-1),
            frequency: HashMap::new(),
        }
    }
}

impl TryFrom<&TrimConfig> for TrimSettings {
    type Error = TrimConfigError;

    fn try_from(config: &TrimConfig) -> Result<Self, Self::Error> {
        validate(config)?;
        Ok(Self {
            retention_depth: config.max_rollback,
            batch_size: config.batch_limit(),
            retained_height: config.effective_retained_height(),
            frequency: config.frequency.clone(),
        })
    }
}

/// Validate the trim configuration.
///
/// Checks:
/// - The rollback depth is not negative
/// - Frequency multipliers are positive
/// - The retained height cannot collide with real chain heights
/// - Every configured table definition is valid
pub fn validate(config: &TrimConfig) -> Result<(), TrimConfigError> {
    if config.max_rollback < 0 {
        return Err(TrimConfigError::NegativeRollback(config.max_rollback));
    }

    if let Some((table, _)) = config.frequency.iter().find(|(_, m)| **m == 0) {
        return Err(TrimConfigError::ZeroFrequency(table.clone()));
    }

    if let Some(height) = config.effective_retained_height().filter(|h| *h >= 0) {
        return Err(TrimConfigError::RetainedHeightNotSentinel(height));
    }

    for table in &config.tables {
        VersionedTable::from(table)
            .validate()
            .map_err(|e| TrimConfigError::InvalidTable {
                table: table.name.clone(),
                source: e,
            })?;
    }

    Ok(())
}

/// Errors that can occur during trim configuration validation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrimConfigError {
    #[error("Invalid max rollback {0}: must not be negative")]
    NegativeRollback(Height),

    #[error("Invalid trim frequency for table '{0}': must be at least 1")]
    ZeroFrequency(String),

    #[error("Invalid retained height {0}: must be negative so it never matches a chain height")]
    RetainedHeightNotSentinel(Height),

    #[error("Invalid definition for table '{table}': {source}")]
    InvalidTable {
        table: String,
        source: TableDefinitionError,
    },
}
