//! Catalog domain module: products, categories and their integration events.
//!
//! Pure domain logic (no IO, no storage). Persistence, caching and transport
//! live in `catalog-infra`.

pub mod category;
pub mod event;
pub mod product;

pub use category::{Category, CategoryNode, CategoryView, NewCategory, build_forest};
pub use event::{ProductEvent, ProductSnapshot, QuantityUpdated, topics};
pub use product::{ImageUpload, NewProduct, Product, ProductPatch, Sku};
