//! Ordered in-memory backing store.
//!
//! Rows are kept in a `BTreeMap` keyed by `(key, Reverse(height))`, which is
//! exactly the scan order the ordered trim needs. Used by tests and by
//! embedders that keep versioned state in memory.

use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::Mutex;

use super::{FallbackCompactor, IndexCatalog, IndexColumn, IndexInfo, StoreError, VersionStore};
use crate::predicate::CompactionPredicate;
use crate::table::{ColumnType, EntityKey, Height, VersionedRow, VersionedTable};

type RowMap = BTreeMap<(EntityKey, Reverse<Height>), bool>;

#[derive(Debug, Default)]
struct MemoryTable {
    column_types: HashMap<String, ColumnType>,
    indexes: Vec<IndexInfo>,
    rows: RowMap,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    batches_started: usize,
    fail_on_batch: Option<usize>,
}

/// In-memory [`VersionStore`].
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    state: Mutex<State>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table together with the `(key ASC, height DESC)` index.
    pub async fn create_table(&self, table: &VersionedTable) {
        let mut columns: Vec<IndexColumn> = table
            .key_columns()
            .iter()
            .map(|c| IndexColumn::asc(c.name.clone()))
            .collect();
        columns.push(IndexColumn::desc(table.height_column()));

        let index = IndexInfo::new(table.scan_index_name(), columns);
        self.create_table_with_indexes(table, vec![index]).await;
    }

    /// Register a table with an explicit set of indexes.
    pub async fn create_table_with_indexes(&self, table: &VersionedTable, indexes: Vec<IndexInfo>) {
        let mut column_types: HashMap<String, ColumnType> = table
            .key_columns()
            .iter()
            .map(|c| (c.name.clone(), c.column_type))
            .collect();
        column_types.insert(table.height_column().to_string(), ColumnType::Integer);
        column_types.insert(table.latest_column().to_string(), ColumnType::Integer);

        let mut state = self.state.lock().await;
        state.tables.insert(
            table.name().to_string(),
            MemoryTable {
                column_types,
                indexes,
                rows: RowMap::new(),
            },
        );
    }

    /// Insert or replace a row.
    pub async fn insert(&self, table: &str, row: VersionedRow) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let rows = &mut state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?
            .rows;
        rows.insert((row.key, Reverse(row.height)), row.latest);
        Ok(())
    }

    /// All rows in scan order.
    pub async fn rows(&self, table: &str) -> Result<Vec<VersionedRow>, StoreError> {
        let state = self.state.lock().await;
        let rows = &state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?
            .rows;
        Ok(rows
            .iter()
            .map(|((key, Reverse(height)), latest)| VersionedRow::new(key.clone(), *height, *latest))
            .collect())
    }

    /// Make the `n`-th batch (1-based, counted from now) fail without
    /// touching any row.
    pub async fn fail_on_batch(&self, n: usize) {
        let mut state = self.state.lock().await;
        state.fail_on_batch = Some(state.batches_started + n);
    }
}

#[async_trait]
impl IndexCatalog for InMemoryVersionStore {
    async fn column_type(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnType>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .get(table)
            .and_then(|t| t.column_types.get(column).copied()))
    }

    async fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .get(table)
            .map(|t| t.indexes.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn delete_batch(
        &self,
        table: &VersionedTable,
        predicate: &mut CompactionPredicate,
        limit: Option<usize>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;

        state.batches_started += 1;
        if state.fail_on_batch == Some(state.batches_started) {
            return Err(StoreError::Unavailable(format!(
                "injected failure on batch {}",
                state.batches_started
            )));
        }

        let rows = &mut state
            .tables
            .get_mut(table.name())
            .ok_or_else(|| StoreError::UnknownTable(table.name().to_string()))?
            .rows;

        let start = (EntityKey::new(predicate.resume_marker()), Reverse(Height::MAX));
        let mut doomed = Vec::new();
        for ((key, Reverse(height)), latest) in rows.range((Bound::Included(start), Bound::Unbounded)) {
            if predicate.decide(key, *height, *latest) {
                doomed.push((key.clone(), Reverse(*height)));
                if limit.is_some_and(|limit| doomed.len() >= limit) {
                    break;
                }
            }
        }

        for row in &doomed {
            rows.remove(row);
        }
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl FallbackCompactor for InMemoryVersionStore {
    async fn trim(
        &self,
        table: &VersionedTable,
        trim_height: Height,
        retained_height: Option<Height>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let rows = &mut state
            .tables
            .get_mut(table.name())
            .ok_or_else(|| StoreError::UnknownTable(table.name().to_string()))?
            .rows;

        // Per key: the greatest row overall and the greatest ordinary row
        // below the trim height.
        let mut newest: HashMap<&EntityKey, (Height, bool)> = HashMap::new();
        let mut boundary: HashMap<&EntityKey, Height> = HashMap::new();
        for ((key, Reverse(height)), latest) in rows.iter() {
            let entry = newest.entry(key).or_insert((*height, *latest));
            if *height > entry.0 {
                *entry = (*height, *latest);
            }
            if *height < trim_height && Some(*height) != retained_height {
                let best = boundary.entry(key).or_insert(*height);
                *best = (*best).max(*height);
            }
        }

        let doomed: Vec<(EntityKey, Reverse<Height>)> = rows
            .keys()
            .filter(|(key, Reverse(height))| {
                if *height >= trim_height || Some(*height) == retained_height {
                    return false;
                }
                let fully_obsolete = newest
                    .get(key)
                    .is_some_and(|(max, latest)| *max < trim_height && !latest);
                fully_obsolete || boundary.get(key) != Some(height)
            })
            .cloned()
            .collect();

        for row in &doomed {
            rows.remove(row);
        }
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::KeyColumn;

    fn table() -> VersionedTable {
        VersionedTable::new("account", vec![KeyColumn::integer("id")])
    }

    async fn seeded() -> InMemoryVersionStore {
        let store = InMemoryVersionStore::new();
        store.create_table(&table()).await;
        for (id, height, latest) in [(1, 10, true), (1, 7, false), (1, 4, false), (1, 1, false), (2, 5, false), (2, 2, false)] {
            store
                .insert("account", VersionedRow::new(EntityKey::new(id), height, latest))
                .await
                .unwrap();
        }
        store
    }

    fn heights(rows: &[VersionedRow], id: i64) -> Vec<Height> {
        rows.iter()
            .filter(|r| r.key.leading == id)
            .map(|r| r.height)
            .collect()
    }

    #[tokio::test]
    async fn test_rows_are_in_scan_order() {
        let store = seeded().await;
        let rows = store.rows("account").await.unwrap();
        assert_eq!(heights(&rows, 1), vec![10, 7, 4, 1]);
        assert_eq!(rows[4].key.leading, 2);
    }

    #[tokio::test]
    async fn test_delete_batch_respects_limit_and_marker() {
        let store = seeded().await;
        let mut predicate = CompactionPredicate::new(6, Some(-1));

        let deleted = store.delete_batch(&table(), &mut predicate, Some(2)).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(predicate.resume_marker(), 2);

        predicate.restart_group();
        let deleted = store.delete_batch(&table(), &mut predicate, Some(2)).await.unwrap();
        assert_eq!(deleted, 1);

        let rows = store.rows("account").await.unwrap();
        assert_eq!(heights(&rows, 1), vec![10, 7, 4]);
        assert!(heights(&rows, 2).is_empty());
    }

    #[tokio::test]
    async fn test_fallback_trim() {
        let store = seeded().await;
        let deleted = store.trim(&table(), 6, Some(-1)).await.unwrap();
        assert_eq!(deleted, 3);

        let rows = store.rows("account").await.unwrap();
        assert_eq!(heights(&rows, 1), vec![10, 7, 4]);
        assert!(heights(&rows, 2).is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_rows_untouched() {
        let store = seeded().await;
        store.fail_on_batch(1).await;

        let mut predicate = CompactionPredicate::new(6, Some(-1));
        let result = store.delete_batch(&table(), &mut predicate, None).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.rows("account").await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = InMemoryVersionStore::new();
        let result = store
            .insert("missing", VersionedRow::new(EntityKey::new(1), 1, true))
            .await;
        assert!(matches!(result, Err(StoreError::UnknownTable(_))));
    }
}
