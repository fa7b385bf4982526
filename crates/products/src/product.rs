use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalog_core::{
    CatalogError, CatalogResult, CategoryId, Entity, Price, ProductId, Quantity, SoftDeletable,
};

/// Stock keeping unit, derived from creation time plus randomness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    /// `SKU-{unix_nanos}-{8 hex chars}`.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros() * 1_000);
        let random: u32 = rand::random();
        Self(format!("SKU-{nanos}-{random:08x}"))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Sku {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image bytes supplied with a product mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// File extension including the leading dot (`".png"`), or empty.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

/// A catalog product row.
///
/// Products live only in the item store; `(id, category_id)` is the row key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: Sku,
    pub name: String,
    pub image_url: String,
    pub description: String,
    pub price: Price,
    pub quantity: Quantity,
    pub category_id: CategoryId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Build the row for a create, once id, sku and image URL are known.
    pub fn from_new(
        new: &NewProduct,
        id: ProductId,
        sku: Sku,
        image_url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sku,
            name: new.name.trim().to_string(),
            image_url: image_url.into(),
            description: new.description.clone(),
            price: new.price,
            quantity: new.quantity,
            category_id: new.category_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDeletable for Product {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// Input: create a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Price,
    pub quantity: Quantity,
    pub category_id: CategoryId,
    pub image: ImageUpload,
}

impl NewProduct {
    pub fn validate(&self) -> CatalogResult<()> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::validation("name cannot be empty"));
        }
        if self.image.bytes.is_empty() {
            return Err(CatalogError::validation("image cannot be empty"));
        }
        Ok(())
    }
}

/// Input: partial update of a live product.
///
/// Only `Some` fields are written; `updated_at` is always refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPatch {
    pub id: ProductId,
    pub category_id: CategoryId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Price>,
    pub image: Option<ImageUpload>,
}

impl ProductPatch {
    pub fn new(id: ProductId, category_id: CategoryId) -> Self {
        Self {
            id,
            category_id,
            name: None,
            description: None,
            price: None,
            image: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_image(mut self, image: ImageUpload) -> Self {
        self.image = Some(image);
        self
    }

    pub fn validate(&self) -> CatalogResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(CatalogError::validation("name cannot be empty"));
            }
        }
        Ok(())
    }
}
