use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use catalog_core::{CategoryId, Price, ProductId, Quantity};
use catalog_products::{Product, Sku};

use super::{PRODUCTS_TABLE, parse_id, parse_timestamp, timestamp};
use crate::store::{DELETED_AT, Filter, Item, ItemKey, ItemStore, KeyCondition, Precondition, StoreError};

/// Field changes for a partial product update. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Price>,
    pub image_url: Option<String>,
}

impl ProductChanges {
    fn into_item(self, now: DateTime<Utc>) -> Item {
        let mut item = Item::new().with_s("updated_at", timestamp(now));
        if let Some(name) = self.name {
            item = item.with_s("name", name.trim());
        }
        if let Some(description) = self.description {
            item = item.with_s("description", description);
        }
        if let Some(price) = self.price {
            item = item.with_n("price", price.amount());
        }
        if let Some(url) = self.image_url {
            item = item.with_s("image_url", url);
        }
        item
    }
}

#[derive(Debug, Clone)]
pub struct ProductRepository<S> {
    store: S,
}

impl<S: ItemStore> ProductRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn key(id: ProductId, category_id: CategoryId) -> ItemKey {
        ItemKey::new(id.to_string(), category_id.to_string())
    }

    pub async fn put(&self, product: &Product) -> Result<(), StoreError> {
        self.store
            .put(PRODUCTS_TABLE, &Self::key(product.id, product.category_id), to_item(product))
            .await
    }

    pub async fn get(&self, id: ProductId, category_id: CategoryId) -> Result<Option<Product>, StoreError> {
        self.store
            .get(PRODUCTS_TABLE, &Self::key(id, category_id), Filter::NotDeleted)
            .await?
            .map(|item| from_item(&item))
            .transpose()
    }

    pub async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let items = self.store.scan(PRODUCTS_TABLE, Filter::NotDeleted).await?;
        items.iter().map(from_item).collect()
    }

    pub async fn by_category(&self, category_id: CategoryId) -> Result<Vec<Product>, StoreError> {
        let condition = KeyCondition::index("category_id", category_id.to_string());
        let items = self
            .store
            .query(PRODUCTS_TABLE, &condition, Filter::NotDeleted)
            .await?;
        items.iter().map(from_item).collect()
    }

    /// The live row for `id`, whichever category it sits in.
    pub async fn find_live(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let condition = KeyCondition::Partition(id.to_string());
        let items = self
            .store
            .query(PRODUCTS_TABLE, &condition, Filter::NotDeleted)
            .await?;
        items.first().map(from_item).transpose()
    }

    pub async fn update(
        &self,
        id: ProductId,
        category_id: CategoryId,
        changes: ProductChanges,
        now: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        let updated = self
            .store
            .conditional_update(
                PRODUCTS_TABLE,
                &Self::key(id, category_id),
                changes.into_item(now),
                Precondition::NotDeleted,
            )
            .await?;
        from_item(&updated)
    }

    pub async fn set_quantity(
        &self,
        id: ProductId,
        category_id: CategoryId,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        let fields = Item::new()
            .with_n("quantity", quantity.value())
            .with_s("updated_at", timestamp(now));
        let updated = self
            .store
            .conditional_update(
                PRODUCTS_TABLE,
                &Self::key(id, category_id),
                fields,
                Precondition::NotDeleted,
            )
            .await?;
        from_item(&updated)
    }

    pub async fn soft_delete(
        &self,
        id: ProductId,
        category_id: CategoryId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let fields = Item::new()
            .with_s(DELETED_AT, timestamp(now))
            .with_s("updated_at", timestamp(now));
        self.store
            .conditional_update(
                PRODUCTS_TABLE,
                &Self::key(id, category_id),
                fields,
                Precondition::NotDeleted,
            )
            .await
            .map(|_| ())
    }
}

fn to_item(p: &Product) -> Item {
    let item = Item::new()
        .with_s("id", p.id.to_string())
        .with_s("sku", p.sku.as_str())
        .with_s("name", p.name.as_str())
        .with_s("image_url", p.image_url.as_str())
        .with_s("description", p.description.as_str())
        .with_n("price", p.price.amount())
        .with_n("quantity", p.quantity.value())
        .with_s("category_id", p.category_id.to_string())
        .with_s("created_at", timestamp(p.created_at))
        .with_s("updated_at", timestamp(p.updated_at));
    match p.deleted_at {
        Some(at) => item.with_s(DELETED_AT, timestamp(at)),
        None => item,
    }
}

fn from_item(item: &Item) -> Result<Product, StoreError> {
    let price: Decimal = item.require_n("price")?;
    Ok(Product {
        id: parse_id("id", item.require_s("id")?)?,
        sku: Sku::from_string(item.require_s("sku")?),
        name: item.require_s("name")?.to_string(),
        image_url: item.require_s("image_url")?.to_string(),
        description: item.require_s("description")?.to_string(),
        price: Price::new(price).map_err(|e| StoreError::Decode(e.to_string()))?,
        quantity: Quantity::new(item.require_n("quantity")?),
        category_id: parse_id("category_id", item.require_s("category_id")?)?,
        created_at: parse_timestamp("created_at", item.require_s("created_at")?)?,
        updated_at: parse_timestamp("updated_at", item.require_s("updated_at")?)?,
        deleted_at: item
            .optional_s(DELETED_AT)?
            .map(|v| parse_timestamp(DELETED_AT, v))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::InMemoryItemStore;
    use catalog_products::{ImageUpload, NewProduct};

    fn product(category_id: CategoryId) -> Product {
        let new = NewProduct {
            name: "Runner".to_string(),
            description: "light".to_string(),
            price: Price::new(Decimal::new(1999, 2)).unwrap(),
            quantity: Quantity::new(10),
            category_id,
            image: ImageUpload::new("a.png", "image/png", vec![1]),
        };
        let now = Utc::now();
        Product::from_new(&new, ProductId::new(), Sku::generate(now), "https://cdn/a.png", now)
    }

    #[tokio::test]
    async fn put_then_get_preserves_every_field() {
        let repo = ProductRepository::new(Arc::new(InMemoryItemStore::new()));
        let p = product(CategoryId::new());
        repo.put(&p).await.unwrap();

        let loaded = repo.get(p.id, p.category_id).await.unwrap().unwrap();
        assert_eq!(loaded.sku, p.sku);
        assert_eq!(loaded.price, p.price);
        assert_eq!(loaded.quantity, p.quantity);
        assert_eq!(loaded.created_at.timestamp_micros(), p.created_at.timestamp_micros());
    }

    #[tokio::test]
    async fn partial_update_only_touches_given_fields() {
        let repo = ProductRepository::new(Arc::new(InMemoryItemStore::new()));
        let p = product(CategoryId::new());
        repo.put(&p).await.unwrap();

        let changes = ProductChanges {
            price: Some(Price::new(Decimal::new(500, 2)).unwrap()),
            ..ProductChanges::default()
        };
        let updated = repo.update(p.id, p.category_id, changes, Utc::now()).await.unwrap();
        assert_eq!(updated.name, "Runner");
        assert_eq!(updated.price.amount(), Decimal::new(500, 2));
        assert!(updated.updated_at >= p.updated_at);
    }

    #[tokio::test]
    async fn soft_delete_hides_row_and_rejects_second_delete() {
        let repo = ProductRepository::new(Arc::new(InMemoryItemStore::new()));
        let p = product(CategoryId::new());
        repo.put(&p).await.unwrap();

        repo.soft_delete(p.id, p.category_id, Utc::now()).await.unwrap();
        assert!(repo.get(p.id, p.category_id).await.unwrap().is_none());
        assert!(repo.find_live(p.id).await.unwrap().is_none());
        assert!(matches!(
            repo.soft_delete(p.id, p.category_id, Utc::now()).await,
            Err(StoreError::ConditionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn find_live_resolves_category_by_product_id() {
        let repo = ProductRepository::new(Arc::new(InMemoryItemStore::new()));
        let p = product(CategoryId::new());
        repo.put(&p).await.unwrap();
        repo.put(&product(CategoryId::new())).await.unwrap();

        let found = repo.find_live(p.id).await.unwrap().unwrap();
        assert_eq!(found.category_id, p.category_id);
        assert_eq!(repo.by_category(p.category_id).await.unwrap().len(), 1);
    }
}
