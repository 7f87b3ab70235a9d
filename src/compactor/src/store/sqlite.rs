//! SQLite backing store.
//!
//! Catalog introspection goes through the `pragma_*` table-valued functions.
//! Batches are selected by streaming the ordered scan through the predicate
//! and deleted by `rowid`, so versioned tables must be rowid tables.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{FallbackCompactor, IndexCatalog, IndexColumn, IndexInfo, StoreError, VersionStore};
use crate::predicate::CompactionPredicate;
use crate::retention::clock::HeightSource;
use crate::table::{ColumnType, EntityKey, Height, KeyValue, VersionedTable};

/// Maximum number of bound parameters per `DELETE ... IN (...)` statement.
const DELETE_CHUNK: usize = 500;

/// [`VersionStore`] backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteVersionStore {
    pool: SqlitePool,
}

impl SqliteVersionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a table and its scan index if they do not exist.
    pub async fn create_table(&self, table: &VersionedTable) -> Result<(), StoreError> {
        sqlx::query(&table.create_table_sql())
            .execute(&self.pool)
            .await?;
        sqlx::query(&table.create_scan_index_sql())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn scan_sql(table: &VersionedTable) -> String {
        let keys: Vec<String> = table
            .key_columns()
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect();

        format!(
            "SELECT rowid, {keys}, \"{height}\", \"{latest}\" FROM \"{table}\" \
             WHERE \"{leading}\" >= ? ORDER BY {order}, \"{height}\" DESC",
            keys = keys.join(", "),
            height = table.height_column(),
            latest = table.latest_column(),
            table = table.name(),
            leading = table.key_columns()[0].name,
            order = keys
                .iter()
                .map(|k| format!("{k} ASC"))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    fn fallback_sql(table: &VersionedTable, retained_height: Option<Height>) -> String {
        let name = table.name();
        let height = table.height_column();
        let latest = table.latest_column();

        let same_key = table
            .key_columns()
            .iter()
            .map(|c| format!("b.\"{col}\" IS \"{name}\".\"{col}\"", col = c.name))
            .collect::<Vec<_>>()
            .join(" AND ");

        let (retained_outer, retained_inner) = match retained_height {
            Some(_) => (
                format!(" AND \"{name}\".\"{height}\" <> ?2"),
                format!(" AND b.\"{height}\" <> ?2"),
            ),
            None => (String::new(), String::new()),
        };

        // A row below the trim height goes when its key is fully obsolete
        // (no latest row and nothing inside the window) or when a newer row
        // below the trim height supersedes it.
        format!(
            "DELETE FROM \"{name}\" \
             WHERE \"{name}\".\"{height}\" < ?1 AND \"{name}\".\"{latest}\" = 0{retained_outer} \
             AND (NOT EXISTS (SELECT 1 FROM \"{name}\" AS b WHERE {same_key} \
                              AND (b.\"{latest}\" <> 0 OR b.\"{height}\" >= ?1)) \
                  OR EXISTS (SELECT 1 FROM \"{name}\" AS b WHERE {same_key} \
                             AND b.\"{height}\" < ?1 AND b.\"{height}\" > \"{name}\".\"{height}\"{retained_inner}))"
        )
    }

    fn decode_key(table: &VersionedTable, row: &SqliteRow) -> Result<EntityKey, StoreError> {
        // Column 0 is the rowid; key columns follow.
        let leading: i64 = row.try_get(1)?;
        let mut key = EntityKey::new(leading);

        for (offset, column) in table.key_columns().iter().enumerate().skip(1) {
            let index = offset + 1;
            let value = match column.column_type {
                ColumnType::Integer => KeyValue::Integer(row.try_get(index)?),
                ColumnType::Text => KeyValue::Text(row.try_get(index)?),
                _ => KeyValue::Blob(row.try_get(index)?),
            };
            key.rest.push(value);
        }
        Ok(key)
    }
}

#[async_trait]
impl IndexCatalog for SqliteVersionStore {
    async fn column_type(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnType>, StoreError> {
        let declared: Option<String> =
            sqlx::query_scalar("SELECT type FROM pragma_table_info(?) WHERE name = ?")
                .bind(table)
                .bind(column)
                .fetch_optional(&self.pool)
                .await?;

        Ok(declared.map(|d| ColumnType::from_declared(&d)))
    }

    async fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, StoreError> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_index_list(?) WHERE \"partial\" = 0")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;

        let mut indexes = Vec::with_capacity(names.len());
        for name in names {
            // Expression columns have no name and can never match a key column.
            let rows = sqlx::query(
                "SELECT coalesce(name, '') AS name, \"desc\" FROM pragma_index_xinfo(?) \
                 WHERE \"key\" = 1 ORDER BY seqno",
            )
            .bind(&name)
            .fetch_all(&self.pool)
            .await?;

            let columns = rows
                .iter()
                .map(|row| {
                    Ok(IndexColumn {
                        name: row.try_get("name")?,
                        descending: row.try_get::<i64, _>("desc")? != 0,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()?;

            indexes.push(IndexInfo { name, columns });
        }

        Ok(indexes)
    }
}

#[async_trait]
impl VersionStore for SqliteVersionStore {
    async fn delete_batch(
        &self,
        table: &VersionedTable,
        predicate: &mut CompactionPredicate,
        limit: Option<usize>,
    ) -> Result<u64, StoreError> {
        table.validate()?;
        let leading = &table.key_columns()[0];
        if leading.column_type != ColumnType::Integer {
            return Err(StoreError::NonIntegerLeadingKey {
                table: table.name().to_string(),
                column: leading.name.clone(),
            });
        }

        let mut tx = self.pool.begin().await?;

        let scan_sql = Self::scan_sql(table);
        let height_index = table.key_columns().len() + 1;
        let mut doomed: Vec<i64> = Vec::new();
        {
            let mut rows = sqlx::query(&scan_sql)
                .bind(predicate.resume_marker())
                .fetch(&mut *tx);

            while let Some(row) = rows.try_next().await? {
                let key = Self::decode_key(table, &row)?;
                let height: i64 = row.try_get(height_index)?;
                let latest: bool = row.try_get(height_index + 1)?;

                if predicate.decide(&key, height, latest) {
                    doomed.push(row.try_get(0)?);
                    if limit.is_some_and(|limit| doomed.len() >= limit) {
                        break;
                    }
                }
            }
        }

        let mut deleted = 0;
        for chunk in doomed.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM \"{}\" WHERE rowid IN ({placeholders})",
                table.name()
            );
            let mut query = sqlx::query(&sql);
            for rowid in chunk {
                query = query.bind(*rowid);
            }
            deleted += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(
            table = %table.name(),
            deleted,
            resume_marker = predicate.resume_marker(),
            "Committed trim batch"
        );
        Ok(deleted)
    }
}

#[async_trait]
impl FallbackCompactor for SqliteVersionStore {
    async fn trim(
        &self,
        table: &VersionedTable,
        trim_height: Height,
        retained_height: Option<Height>,
    ) -> Result<u64, StoreError> {
        table.validate()?;
        let sql = Self::fallback_sql(table, retained_height);

        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query(&sql).bind(trim_height);
        if let Some(retained) = retained_height {
            query = query.bind(retained);
        }
        let deleted = query.execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        Ok(deleted)
    }
}

/// [`HeightSource`] reading the current height with a SQL query.
#[derive(Debug, Clone)]
pub struct SqlHeightSource {
    pool: SqlitePool,
    query: String,
    retention_depth: Height,
}

impl SqlHeightSource {
    pub fn new(pool: SqlitePool, query: impl Into<String>, retention_depth: Height) -> Self {
        Self {
            pool,
            query: query.into(),
            retention_depth,
        }
    }
}

#[async_trait]
impl HeightSource for SqlHeightSource {
    async fn current_height(&self) -> Result<Height, StoreError> {
        // An empty chain has no height yet.
        let height: Option<i64> = sqlx::query_scalar(&self.query)
            .fetch_one(&self.pool)
            .await?;
        Ok(height.unwrap_or(0))
    }

    fn retention_depth(&self) -> Height {
        self.retention_depth
    }
}
