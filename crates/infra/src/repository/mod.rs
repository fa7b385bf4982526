//! Typed repositories over the item store.
//!
//! These map catalog entities to and from store attribute maps and fix the
//! key layout: products are keyed `(id, category_id)`, categories by `id`.

pub mod category;
pub mod product;

pub use category::CategoryRepository;
pub use product::{ProductChanges, ProductRepository};

use chrono::{DateTime, Utc};

use crate::store::StoreError;

pub const PRODUCTS_TABLE: &str = "products";
pub const CATEGORIES_TABLE: &str = "categories";

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("{name}: {e}")))
}

fn parse_id<T>(name: &str, value: &str) -> Result<T, StoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Decode(format!("{name}: {e}")))
}
