//! Key-addressed item store.
//!
//! Rows are flat attribute maps addressed by `(table, partition, sort)`, in the
//! shape of a document store's native attribute model. Soft deletion is an
//! ordinary attribute write (`deleted_at`), and every read path filters
//! tombstoned rows unless asked otherwise.
//!
//! ## Conditional writes
//!
//! `conditional_update` is the only conflict-detection mechanism: the first
//! writer whose precondition holds wins, the loser gets
//! [`StoreError::ConditionFailed`]. The store applies the whole field set or
//! none of it.

pub mod in_memory;
pub mod postgres;

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use catalog_core::CatalogError;

pub use in_memory::InMemoryItemStore;
pub use postgres::PostgresItemStore;

/// Attribute marking a tombstoned row.
pub const DELETED_AT: &str = "deleted_at";

/// A single attribute value.
///
/// Numbers are carried as their decimal string form so that prices keep full
/// precision through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> &str {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) => s,
        }
    }
}

/// A stored row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(BTreeMap<String, AttributeValue>);

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_s(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.insert(name.to_string(), AttributeValue::S(value.into()));
        self
    }

    pub fn with_n(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), AttributeValue::N(value.to_string()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_deleted(&self) -> bool {
        self.contains(DELETED_AT)
    }

    /// Overwrite this row's attributes with `fields`.
    pub fn merge(&mut self, fields: Item) {
        self.0.extend(fields.0);
    }

    pub fn require_s(&self, name: &str) -> Result<&str, StoreError> {
        match self.0.get(name) {
            Some(AttributeValue::S(s)) => Ok(s),
            Some(AttributeValue::N(_)) => Err(StoreError::Decode(format!("{name}: expected string"))),
            None => Err(StoreError::Decode(format!("{name}: missing"))),
        }
    }

    pub fn optional_s(&self, name: &str) -> Result<Option<&str>, StoreError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(_) => self.require_s(name).map(Some),
        }
    }

    pub fn require_n<T>(&self, name: &str) -> Result<T, StoreError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        match self.0.get(name) {
            Some(AttributeValue::N(n)) => n
                .parse()
                .map_err(|e: T::Err| StoreError::Decode(format!("{name}: {e}"))),
            Some(AttributeValue::S(_)) => Err(StoreError::Decode(format!("{name}: expected number"))),
            None => Err(StoreError::Decode(format!("{name}: missing"))),
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }
}

/// Composite row key. Tables without a sort key use `sort == ""`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    pub fn partition_only(partition: impl Into<String>) -> Self {
        Self::new(partition, "")
    }
}

impl core::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.sort.is_empty() {
            write!(f, "{}", self.partition)
        } else {
            write!(f, "{}/{}", self.partition, self.sort)
        }
    }
}

/// Condition a row must satisfy for a conditional update to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The row exists (tombstoned or not).
    Exists,
    /// The row exists and carries no tombstone.
    NotDeleted,
}

/// Row filter for scans and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    All,
    NotDeleted,
}

impl Filter {
    pub fn admits(&self, item: &Item) -> bool {
        match self {
            Filter::All => true,
            Filter::NotDeleted => !item.is_deleted(),
        }
    }
}

/// Query selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCondition {
    /// Every row sharing a partition key, across sort keys.
    Partition(String),
    /// Rows whose string attribute equals `value` (secondary index lookup).
    Index { attribute: String, value: String },
}

impl KeyCondition {
    pub fn index(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Index {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("condition failed for {table}:{key}")]
    ConditionFailed { table: String, key: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("stored item could not be decoded: {0}")]
    Decode(String),
}

impl From<StoreError> for CatalogError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::ConditionFailed { table, key } => {
                CatalogError::not_found(format!("{table} {key} not found or already deleted"))
            }
            StoreError::Backend(msg) => CatalogError::upstream("item store", msg),
            StoreError::Decode(msg) => CatalogError::malformed(msg),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Backend(value.to_string())
    }
}

/// Durable key-addressed store.
///
/// Implementations must be shareable across tasks; all operations are
/// independent and unordered with respect to each other.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert or overwrite a row.
    async fn put(&self, table: &str, key: &ItemKey, item: Item) -> Result<(), StoreError>;

    async fn get(&self, table: &str, key: &ItemKey, filter: Filter) -> Result<Option<Item>, StoreError>;

    async fn scan(&self, table: &str, filter: Filter) -> Result<Vec<Item>, StoreError>;

    async fn query(
        &self,
        table: &str,
        condition: &KeyCondition,
        filter: Filter,
    ) -> Result<Vec<Item>, StoreError>;

    /// Merge `fields` into the row if `precondition` holds; returns the updated row.
    async fn conditional_update(
        &self,
        table: &str,
        key: &ItemKey,
        fields: Item,
        precondition: Precondition,
    ) -> Result<Item, StoreError>;
}

#[async_trait]
impl<S> ItemStore for std::sync::Arc<S>
where
    S: ItemStore + ?Sized,
{
    async fn put(&self, table: &str, key: &ItemKey, item: Item) -> Result<(), StoreError> {
        (**self).put(table, key, item).await
    }

    async fn get(&self, table: &str, key: &ItemKey, filter: Filter) -> Result<Option<Item>, StoreError> {
        (**self).get(table, key, filter).await
    }

    async fn scan(&self, table: &str, filter: Filter) -> Result<Vec<Item>, StoreError> {
        (**self).scan(table, filter).await
    }

    async fn query(
        &self,
        table: &str,
        condition: &KeyCondition,
        filter: Filter,
    ) -> Result<Vec<Item>, StoreError> {
        (**self).query(table, condition, filter).await
    }

    async fn conditional_update(
        &self,
        table: &str,
        key: &ItemKey,
        fields: Item,
        precondition: Precondition,
    ) -> Result<Item, StoreError> {
        (**self).conditional_update(table, key, fields, precondition).await
    }
}
