//! Multi-version table definitions.
//!
//! A versioned table stores one row per state change of a business entity.
//! Rows are identified by the entity's business key and the chain height at
//! which the state was recorded; at most one row per key carries the latest
//! flag.

use common::config::{KeyColumnType, TableConfig};
use std::fmt;
use thiserror::Error;

/// Chain height. Negative values are reserved for sentinel rows.
pub type Height = i64;

/// Stored type of a column, following SQLite type affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 64-bit signed integer
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl ColumnType {
    /// Resolve a declared column type using SQLite affinity rules.
    pub fn from_declared(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        if declared.contains("INT") {
            ColumnType::Integer
        } else if declared.contains("CHAR") || declared.contains("CLOB") || declared.contains("TEXT")
        {
            ColumnType::Text
        } else if declared.is_empty() || declared.contains("BLOB") {
            ColumnType::Blob
        } else if declared.contains("REAL")
            || declared.contains("FLOA")
            || declared.contains("DOUB")
        {
            ColumnType::Real
        } else {
            ColumnType::Numeric
        }
    }

    fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::Real => "REAL",
            ColumnType::Numeric => "NUMERIC",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl From<KeyColumnType> for ColumnType {
    fn from(value: KeyColumnType) -> Self {
        match value {
            KeyColumnType::Integer => ColumnType::Integer,
            KeyColumnType::Text => ColumnType::Text,
            KeyColumnType::Blob => ColumnType::Blob,
        }
    }
}

/// A business-key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl KeyColumn {
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Integer,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Text,
        }
    }

    pub fn blob(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Blob,
        }
    }
}

/// Value of a trailing (non-leading) key column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    Integer(i64),
    Text(String),
    Blob(Vec<u8>),
}

/// Business key of an entity. The leading column is always a 64-bit integer
/// so that it can serve as a resume marker between batches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub leading: i64,
    pub rest: Vec<KeyValue>,
}

impl EntityKey {
    pub fn new(leading: i64) -> Self {
        Self {
            leading,
            rest: Vec::new(),
        }
    }

    pub fn with(mut self, value: KeyValue) -> Self {
        self.rest.push(value);
        self
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.leading)?;
        for value in &self.rest {
            match value {
                KeyValue::Integer(v) => write!(f, "/{v}")?,
                KeyValue::Text(v) => write!(f, "/{v}")?,
                KeyValue::Blob(v) => write!(f, "/<{} bytes>", v.len())?,
            }
        }
        Ok(())
    }
}

/// One stored version of an entity. Payload columns are not represented.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedRow {
    pub key: EntityKey,
    pub height: Height,
    pub latest: bool,
}

impl VersionedRow {
    pub fn new(key: EntityKey, height: Height, latest: bool) -> Self {
        Self {
            key,
            height,
            latest,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableDefinitionError {
    #[error("Table {0} has no key columns")]
    NoKeyColumns(String),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Column '{column}' is used more than once in table {table}")]
    DuplicateColumn { table: String, column: String },
}

/// Shape of a multi-version table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedTable {
    name: String,
    key_columns: Vec<KeyColumn>,
    height_column: String,
    latest_column: String,
}

impl VersionedTable {
    /// Create a table definition with the default `height` and `latest` columns.
    pub fn new(name: impl Into<String>, key_columns: Vec<KeyColumn>) -> Self {
        Self {
            name: name.into(),
            key_columns,
            height_column: "height".to_string(),
            latest_column: "latest".to_string(),
        }
    }

    pub fn with_height_column(mut self, column: impl Into<String>) -> Self {
        self.height_column = column.into();
        self
    }

    pub fn with_latest_column(mut self, column: impl Into<String>) -> Self {
        self.latest_column = column.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_columns(&self) -> &[KeyColumn] {
        &self.key_columns
    }

    pub fn height_column(&self) -> &str {
        &self.height_column
    }

    pub fn latest_column(&self) -> &str {
        &self.latest_column
    }

    /// Check that the definition is usable. Identifiers end up in SQL text, so
    /// only plain identifiers are accepted.
    pub fn validate(&self) -> Result<(), TableDefinitionError> {
        if self.key_columns.is_empty() {
            return Err(TableDefinitionError::NoKeyColumns(self.name.clone()));
        }

        let mut seen = std::collections::HashSet::new();
        let columns = self
            .key_columns
            .iter()
            .map(|c| c.name.as_str())
            .chain([self.height_column.as_str(), self.latest_column.as_str()]);

        for identifier in std::iter::once(self.name.as_str()).chain(columns.clone()) {
            if !is_identifier(identifier) {
                return Err(TableDefinitionError::InvalidIdentifier(
                    identifier.to_string(),
                ));
            }
        }

        for column in columns {
            if !seen.insert(column) {
                return Err(TableDefinitionError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Name of the index created by [`VersionedTable::create_scan_index_sql`].
    pub fn scan_index_name(&self) -> String {
        format!("{}_trim_idx", self.name)
    }

    /// SQLite DDL for a table of this shape with an opaque payload column.
    pub fn create_table_sql(&self) -> String {
        let mut columns: Vec<String> = self
            .key_columns
            .iter()
            .map(|c| format!("\"{}\" {} NOT NULL", c.name, c.column_type))
            .collect();
        columns.push(format!("\"{}\" INTEGER NOT NULL", self.height_column));
        columns.push(format!(
            "\"{}\" BOOLEAN NOT NULL DEFAULT 1",
            self.latest_column
        ));
        columns.push("payload BLOB".to_string());

        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            self.name,
            columns.join(", ")
        )
    }

    /// SQLite DDL for the `(key ASC, height DESC)` index the fast path needs.
    pub fn create_scan_index_sql(&self) -> String {
        let mut columns: Vec<String> = self
            .key_columns
            .iter()
            .map(|c| format!("\"{}\" ASC", c.name))
            .collect();
        columns.push(format!("\"{}\" DESC", self.height_column));

        format!(
            "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({})",
            self.scan_index_name(),
            self.name,
            columns.join(", ")
        )
    }
}

impl From<&TableConfig> for VersionedTable {
    fn from(config: &TableConfig) -> Self {
        let key_columns = config
            .key_columns
            .iter()
            .map(|c| KeyColumn {
                name: c.name.clone(),
                column_type: c.column_type.into(),
            })
            .collect();

        VersionedTable::new(config.name.clone(), key_columns)
            .with_height_column(config.height_column.clone())
            .with_latest_column(config.latest_column.clone())
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::KeyColumnConfig;

    fn balance_table() -> VersionedTable {
        VersionedTable::new(
            "account_asset",
            vec![KeyColumn::integer("account_id"), KeyColumn::integer("asset_id")],
        )
    }

    #[test]
    fn test_declared_type_affinity() {
        assert_eq!(ColumnType::from_declared("BIGINT"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("integer"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("VARCHAR(64)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared(""), ColumnType::Blob);
        assert_eq!(ColumnType::from_declared("DOUBLE"), ColumnType::Real);
        assert_eq!(ColumnType::from_declared("DECIMAL(10,2)"), ColumnType::Numeric);
    }

    #[test]
    fn test_validate() {
        assert!(balance_table().validate().is_ok());

        let keyless = VersionedTable::new("account", vec![]);
        assert_eq!(
            keyless.validate(),
            Err(TableDefinitionError::NoKeyColumns("account".to_string()))
        );

        let injected = VersionedTable::new("account; DROP TABLE block", vec![KeyColumn::integer("id")]);
        assert!(matches!(
            injected.validate(),
            Err(TableDefinitionError::InvalidIdentifier(_))
        ));

        let clash = VersionedTable::new("account", vec![KeyColumn::integer("height")]);
        assert!(matches!(
            clash.validate(),
            Err(TableDefinitionError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_ddl() {
        let table = balance_table();
        assert_eq!(
            table.create_scan_index_sql(),
            "CREATE INDEX IF NOT EXISTS \"account_asset_trim_idx\" ON \"account_asset\" (\"account_id\" ASC, \"asset_id\" ASC, \"height\" DESC)"
        );
        assert!(table.create_table_sql().contains("\"latest\" BOOLEAN NOT NULL DEFAULT 1"));
    }

    #[test]
    fn test_entity_key_ordering() {
        let a = EntityKey::new(1).with(KeyValue::Text("b".to_string()));
        let b = EntityKey::new(1).with(KeyValue::Text("c".to_string()));
        let c = EntityKey::new(2);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.to_string(), "1/b");
    }

    #[test]
    fn test_from_config() {
        let config = TableConfig {
            name: "alias".to_string(),
            key_columns: vec![
                KeyColumnConfig {
                    name: "id".to_string(),
                    column_type: KeyColumnType::Integer,
                },
                KeyColumnConfig {
                    name: "alias_name".to_string(),
                    column_type: KeyColumnType::Text,
                },
            ],
            height_column: "height".to_string(),
            latest_column: "is_latest".to_string(),
        };

        let table = VersionedTable::from(&config);
        assert_eq!(table.name(), "alias");
        assert_eq!(table.key_columns()[1], KeyColumn::text("alias_name"));
        assert_eq!(table.latest_column(), "is_latest");
    }
}
