//! Keyed-hash + set cache.
//!
//! Every mutation goes through [`CacheClient::exec_batch`], which applies a
//! list of operations atomically: concurrent batches land in some total order
//! and never interleave. Reads are single-key.

pub mod category_index;
pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use catalog_core::CatalogError;

pub use category_index::{ALL_CATEGORIES_KEY, CategoryIndex, category_key, children_key};
pub use in_memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// One write in an atomic cache batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// Set several hash fields.
    HashSet { key: String, fields: Vec<(String, String)> },
    HashSetField { key: String, field: String, value: String },
    Delete { key: String },
    SetAdd { key: String, members: Vec<String> },
    SetRemove { key: String, members: Vec<String> },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),
}

impl From<CacheError> for CatalogError {
    fn from(value: CacheError) -> Self {
        CatalogError::upstream("cache", value.to_string())
    }
}

#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Apply `ops` as one atomic batch.
    async fn exec_batch(&self, ops: Vec<CacheOp>) -> Result<(), CacheError>;

    /// All fields of a hash; empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    /// Members of a set; empty when the key does not exist.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError>;
}

#[async_trait]
impl<C> CacheClient for std::sync::Arc<C>
where
    C: CacheClient + ?Sized,
{
    async fn exec_batch(&self, ops: Vec<CacheOp>) -> Result<(), CacheError> {
        (**self).exec_batch(ops).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        (**self).hash_get_all(key).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        (**self).set_members(key).await
    }
}
