use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::{AttributeValue, Filter, Item, ItemKey, ItemStore, KeyCondition, Precondition, StoreError};

type RowKey = (String, ItemKey);

/// In-memory item store.
///
/// Intended for tests/dev. Rows are kept in key order so scans are
/// deterministic. Failures and latency can be injected:
/// - [`InMemoryItemStore::set_failing`] fails every call
/// - [`InMemoryItemStore::fail_index_value`] fails index queries for one value
/// - [`InMemoryItemStore::set_latency`] delays every call
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    rows: RwLock<BTreeMap<RowKey, Item>>,
    failing: AtomicBool,
    failing_index_values: Mutex<HashSet<String>>,
    latency_ms: AtomicU64,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_index_value(&self, value: impl Into<String>) {
        if let Ok(mut values) = self.failing_index_values.lock() {
            values.insert(value.into());
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of rows in `table`, tombstoned rows included.
    pub fn row_count(&self, table: &str) -> usize {
        self.rows
            .read()
            .map(|rows| rows.keys().filter(|(t, _)| t == table).count())
            .unwrap_or(0)
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected failure".to_string()));
        }
        Ok(())
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("lock poisoned".to_string())
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn put(&self, table: &str, key: &ItemKey, item: Item) -> Result<(), StoreError> {
        self.enter().await?;
        self.rows
            .write()
            .map_err(|_| Self::poisoned())?
            .insert((table.to_string(), key.clone()), item);
        Ok(())
    }

    async fn get(&self, table: &str, key: &ItemKey, filter: Filter) -> Result<Option<Item>, StoreError> {
        self.enter().await?;
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .get(&(table.to_string(), key.clone()))
            .filter(|item| filter.admits(item))
            .cloned())
    }

    async fn scan(&self, table: &str, filter: Filter) -> Result<Vec<Item>, StoreError> {
        self.enter().await?;
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter()
            .filter(|((t, _), item)| t == table && filter.admits(item))
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn query(
        &self,
        table: &str,
        condition: &KeyCondition,
        filter: Filter,
    ) -> Result<Vec<Item>, StoreError> {
        self.enter().await?;
        if let KeyCondition::Index { value, .. } = condition {
            let failing = self
                .failing_index_values
                .lock()
                .map_err(|_| Self::poisoned())?
                .contains(value);
            if failing {
                return Err(StoreError::Backend(format!("injected failure for {value}")));
            }
        }

        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter()
            .filter(|((t, key), item)| {
                t == table
                    && filter.admits(item)
                    && match condition {
                        KeyCondition::Partition(p) => &key.partition == p,
                        KeyCondition::Index { attribute, value } => {
                            matches!(item.get(attribute), Some(AttributeValue::S(s)) if s == value)
                        }
                    }
            })
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn conditional_update(
        &self,
        table: &str,
        key: &ItemKey,
        fields: Item,
        precondition: Precondition,
    ) -> Result<Item, StoreError> {
        self.enter().await?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let row = rows
            .get_mut(&(table.to_string(), key.clone()))
            .filter(|item| match precondition {
                Precondition::Exists => true,
                Precondition::NotDeleted => !item.is_deleted(),
            })
            .ok_or_else(|| StoreError::ConditionFailed {
                table: table.to_string(),
                key: key.to_string(),
            })?;
        row.merge(fields);
        Ok(row.clone())
    }
}
