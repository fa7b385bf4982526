//! `catalog-core` — catalog foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::{Entity, SoftDeletable};
pub use error::{CatalogError, CatalogResult};
pub use id::{CategoryId, ProductId};
pub use value_object::{Price, Quantity, ValueObject};
