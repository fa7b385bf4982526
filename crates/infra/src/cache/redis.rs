//! Redis-backed cache.
//!
//! Batches are sent as a `MULTI/EXEC` pipeline over a shared
//! [`ConnectionManager`], which reconnects transparently.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::instrument;

use super::{CacheClient, CacheError, CacheOp};

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl core::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    #[instrument(skip_all, fields(ops = ops.len()), err)]
    async fn exec_batch(&self, ops: Vec<CacheOp>) -> Result<(), CacheError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                CacheOp::HashSet { key, fields } => {
                    pipe.hset_multiple(key, fields).ignore();
                }
                CacheOp::HashSetField { key, field, value } => {
                    pipe.hset(key, field, value).ignore();
                }
                CacheOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
                CacheOp::SetAdd { key, members } if !members.is_empty() => {
                    pipe.sadd(key, members).ignore();
                }
                CacheOp::SetRemove { key, members } if !members.is_empty() => {
                    pipe.srem(key, members).ignore();
                }
                CacheOp::SetAdd { .. } | CacheOp::SetRemove { .. } => {}
            }
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::Command(format!("MULTI/EXEC failed: {e}")))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| CacheError::Command(format!("HGETALL {key} failed: {e}")))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.smembers(key)
            .await
            .map_err(|e| CacheError::Command(format!("SMEMBERS {key} failed: {e}")))
    }
}
