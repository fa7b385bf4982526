use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use catalog_core::{CatalogError, CatalogResult, CategoryId, ProductId, Quantity};
use catalog_events::{Event, IntegrationEvent};

use crate::product::Product;

/// Broker topic names owned by the catalog.
pub mod topics {
    pub const PRODUCT_CREATED: &str = "product-created";
    pub const PRODUCT_UPDATED: &str = "product-updated";
    /// Inbound: stock changes decided by another service.
    pub const PRODUCT_QUANTITY_UPDATED: &str = "product-quantity-updated";
}

/// Wire projection of a product carried by created/updated events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub sku: String,
    pub product_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub product_price: Decimal,
    pub product_quantity: u32,
    pub category_id: CategoryId,
    pub image_url: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Product> for ProductSnapshot {
    fn from(p: &Product) -> Self {
        Self {
            product_id: p.id,
            sku: p.sku.as_str().to_string(),
            product_name: p.name.clone(),
            product_price: p.price.amount(),
            product_quantity: p.quantity.value(),
            category_id: p.category_id,
            image_url: p.image_url.clone(),
            description: p.description.clone(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProductEvent {
    ProductCreated(ProductSnapshot),
    ProductUpdated(ProductSnapshot),
}

impl ProductEvent {
    pub fn created(product: &Product) -> Self {
        Self::ProductCreated(product.into())
    }

    pub fn updated(product: &Product) -> Self {
        Self::ProductUpdated(product.into())
    }

    pub fn snapshot(&self) -> &ProductSnapshot {
        match self {
            ProductEvent::ProductCreated(s) | ProductEvent::ProductUpdated(s) => s,
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::ProductUpdated(_) => "catalog.product.updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.snapshot().updated_at
    }
}

impl IntegrationEvent for ProductEvent {
    type Body = ProductSnapshot;

    fn topic(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => topics::PRODUCT_CREATED,
            ProductEvent::ProductUpdated(_) => topics::PRODUCT_UPDATED,
        }
    }

    fn key(&self) -> Vec<u8> {
        self.snapshot().product_id.to_string().into_bytes()
    }

    fn body(&self) -> &Self::Body {
        self.snapshot()
    }
}

/// Inbound message: `{product_id, product_quantity}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityUpdated {
    pub product_id: ProductId,
    pub product_quantity: i64,
}

impl QuantityUpdated {
    pub fn decode(payload: &[u8]) -> CatalogResult<Self> {
        serde_json::from_slice(payload).map_err(|e| CatalogError::malformed(e.to_string()))
    }

    /// The new stock level; negative or oversized values are malformed.
    pub fn quantity(&self) -> CatalogResult<Quantity> {
        Quantity::try_from(self.product_quantity)
            .map_err(|_| CatalogError::malformed(format!("invalid quantity {}", self.product_quantity)))
    }
}
