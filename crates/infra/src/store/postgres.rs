//! Postgres-backed item store.
//!
//! Every logical table shares one physical `items` table; rows are JSONB
//! attribute maps keyed by `(table_name, pk, sk)`.
//!
//! ## Error Mapping
//!
//! | Situation | StoreError |
//! |-----------|------------|
//! | conditional `UPDATE ... RETURNING` matches no row | `ConditionFailed` |
//! | any SQLx error (pool closed, network, constraint) | `Backend` |
//! | `attrs` column does not decode into an attribute map | `Backend` (decode errors surface from SQLx) |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::{Filter, Item, ItemKey, ItemStore, KeyCondition, Precondition, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        table_name TEXT NOT NULL,
        pk TEXT NOT NULL,
        sk TEXT NOT NULL DEFAULT '',
        attrs JSONB NOT NULL,
        PRIMARY KEY (table_name, pk, sk)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS items_category_idx
        ON items (table_name, (attrs->'category_id'->>'S'))
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS items_parent_idx
        ON items (table_name, (attrs->'parent_id'->>'S'))
    "#,
];

/// Postgres-backed item store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`. Conditional updates
/// are single statements, so a precondition and its write are atomic.
#[derive(Debug, Clone)]
pub struct PostgresItemStore {
    pool: Arc<PgPool>,
}

impl PostgresItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Create the `items` table and its lookup indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&*self.pool).await?;
        }
        Ok(())
    }

    fn filter_clause(filter: Filter) -> &'static str {
        match filter {
            Filter::All => "",
            Filter::NotDeleted => " AND NOT (attrs ? 'deleted_at')",
        }
    }

    fn decode_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Item>, StoreError> {
        rows.into_iter()
            .map(|row| {
                row.try_get::<Json<Item>, _>("attrs")
                    .map(|json| json.0)
                    .map_err(StoreError::from)
            })
            .collect()
    }
}

#[async_trait]
impl ItemStore for PostgresItemStore {
    #[instrument(skip_all, fields(table = %table, key = %key), err)]
    async fn put(&self, table: &str, key: &ItemKey, item: Item) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO items (table_name, pk, sk, attrs)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (table_name, pk, sk)
            DO UPDATE SET attrs = EXCLUDED.attrs
            "#,
        )
        .bind(table)
        .bind(&key.partition)
        .bind(&key.sort)
        .bind(Json(&item))
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(table = %table, key = %key), err)]
    async fn get(&self, table: &str, key: &ItemKey, filter: Filter) -> Result<Option<Item>, StoreError> {
        let sql = format!(
            "SELECT attrs FROM items WHERE table_name = $1 AND pk = $2 AND sk = $3{}",
            Self::filter_clause(filter)
        );
        let row = sqlx::query(&sql)
            .bind(table)
            .bind(&key.partition)
            .bind(&key.sort)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(Self::decode_rows(row.into_iter().collect())?.pop())
    }

    #[instrument(skip_all, fields(table = %table), err)]
    async fn scan(&self, table: &str, filter: Filter) -> Result<Vec<Item>, StoreError> {
        let sql = format!(
            "SELECT attrs FROM items WHERE table_name = $1{} ORDER BY pk, sk",
            Self::filter_clause(filter)
        );
        let rows = sqlx::query(&sql).bind(table).fetch_all(&*self.pool).await?;
        Self::decode_rows(rows)
    }

    #[instrument(skip_all, fields(table = %table), err)]
    async fn query(
        &self,
        table: &str,
        condition: &KeyCondition,
        filter: Filter,
    ) -> Result<Vec<Item>, StoreError> {
        let rows = match condition {
            KeyCondition::Partition(partition) => {
                let sql = format!(
                    "SELECT attrs FROM items WHERE table_name = $1 AND pk = $2{} ORDER BY sk",
                    Self::filter_clause(filter)
                );
                sqlx::query(&sql)
                    .bind(table)
                    .bind(partition)
                    .fetch_all(&*self.pool)
                    .await?
            }
            KeyCondition::Index { attribute, value } => {
                let sql = format!(
                    "SELECT attrs FROM items WHERE table_name = $1 AND attrs->$2->>'S' = $3{} ORDER BY pk, sk",
                    Self::filter_clause(filter)
                );
                sqlx::query(&sql)
                    .bind(table)
                    .bind(attribute)
                    .bind(value)
                    .fetch_all(&*self.pool)
                    .await?
            }
        };
        Self::decode_rows(rows)
    }

    #[instrument(skip_all, fields(table = %table, key = %key), err)]
    async fn conditional_update(
        &self,
        table: &str,
        key: &ItemKey,
        fields: Item,
        precondition: Precondition,
    ) -> Result<Item, StoreError> {
        let filter = match precondition {
            Precondition::Exists => Filter::All,
            Precondition::NotDeleted => Filter::NotDeleted,
        };
        let sql = format!(
            "UPDATE items SET attrs = attrs || $4 \
             WHERE table_name = $1 AND pk = $2 AND sk = $3{} \
             RETURNING attrs",
            Self::filter_clause(filter)
        );
        let row = sqlx::query(&sql)
            .bind(table)
            .bind(&key.partition)
            .bind(&key.sort)
            .bind(Json(&fields))
            .fetch_optional(&*self.pool)
            .await?;

        Self::decode_rows(row.into_iter().collect())?
            .pop()
            .ok_or_else(|| StoreError::ConditionFailed {
                table: table.to_string(),
                key: key.to_string(),
            })
    }
}
