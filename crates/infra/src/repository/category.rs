use chrono::{DateTime, Utc};

use catalog_core::CategoryId;
use catalog_products::Category;

use super::{CATEGORIES_TABLE, parse_id, parse_timestamp, timestamp};
use crate::store::{DELETED_AT, Filter, Item, ItemKey, ItemStore, KeyCondition, Precondition, StoreError};

#[derive(Debug, Clone)]
pub struct CategoryRepository<S> {
    store: S,
}

impl<S: ItemStore> CategoryRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn key(id: CategoryId) -> ItemKey {
        ItemKey::partition_only(id.to_string())
    }

    pub async fn put(&self, category: &Category) -> Result<(), StoreError> {
        self.store
            .put(CATEGORIES_TABLE, &Self::key(category.id), to_item(category))
            .await
    }

    pub async fn get(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        self.store
            .get(CATEGORIES_TABLE, &Self::key(id), Filter::NotDeleted)
            .await?
            .map(|item| from_item(&item))
            .transpose()
    }

    pub async fn list(&self) -> Result<Vec<Category>, StoreError> {
        let items = self.store.scan(CATEGORIES_TABLE, Filter::NotDeleted).await?;
        items.iter().map(from_item).collect()
    }

    /// Live categories whose `parent_id` is `parent`.
    pub async fn children_of(&self, parent: CategoryId) -> Result<Vec<Category>, StoreError> {
        let condition = KeyCondition::index("parent_id", parent.to_string());
        let items = self
            .store
            .query(CATEGORIES_TABLE, &condition, Filter::NotDeleted)
            .await?;
        items.iter().map(from_item).collect()
    }

    pub async fn rename(
        &self,
        id: CategoryId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Category, StoreError> {
        let fields = Item::new()
            .with_s("name", name)
            .with_s("updated_at", timestamp(now));
        let updated = self
            .store
            .conditional_update(CATEGORIES_TABLE, &Self::key(id), fields, Precondition::NotDeleted)
            .await?;
        from_item(&updated)
    }

    /// Tombstone a live category and return its final state.
    pub async fn soft_delete(&self, id: CategoryId, now: DateTime<Utc>) -> Result<Category, StoreError> {
        let fields = Item::new()
            .with_s(DELETED_AT, timestamp(now))
            .with_s("updated_at", timestamp(now));
        let deleted = self
            .store
            .conditional_update(CATEGORIES_TABLE, &Self::key(id), fields, Precondition::NotDeleted)
            .await?;
        from_item(&deleted)
    }
}

fn to_item(c: &Category) -> Item {
    let mut item = Item::new()
        .with_s("id", c.id.to_string())
        .with_s("name", c.name.as_str())
        .with_s("created_at", timestamp(c.created_at))
        .with_s("updated_at", timestamp(c.updated_at));
    if let Some(parent) = c.parent_id {
        item = item.with_s("parent_id", parent.to_string());
    }
    if let Some(at) = c.deleted_at {
        item = item.with_s(DELETED_AT, timestamp(at));
    }
    item
}

fn from_item(item: &Item) -> Result<Category, StoreError> {
    Ok(Category {
        id: parse_id("id", item.require_s("id")?)?,
        name: item.require_s("name")?.to_string(),
        parent_id: item
            .optional_s("parent_id")?
            .map(|v| parse_id("parent_id", v))
            .transpose()?,
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
    use catalog_products::NewCategory;

    fn category(new: NewCategory) -> Category {
        Category::create(&new, CategoryId::new(), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn root_and_child_round_trip_through_the_store() {
        let repo = CategoryRepository::new(Arc::new(InMemoryItemStore::new()));
        let shoes = category(NewCategory::root("Shoes"));
        let sneakers = category(NewCategory::child("Sneakers", shoes.id));
        repo.put(&shoes).await.unwrap();
        repo.put(&sneakers).await.unwrap();

        assert_eq!(repo.get(shoes.id).await.unwrap().unwrap().parent_id, None);
        let children = repo.children_of(shoes.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, sneakers.id);
    }

    #[tokio::test]
    async fn rename_and_delete_require_a_live_row() {
        let repo = CategoryRepository::new(Arc::new(InMemoryItemStore::new()));
        let shoes = category(NewCategory::root("Shoes"));
        repo.put(&shoes).await.unwrap();

        let renamed = repo.rename(shoes.id, "Footwear", Utc::now()).await.unwrap();
        assert_eq!(renamed.name, "Footwear");

        let deleted = repo.soft_delete(shoes.id, Utc::now()).await.unwrap();
        assert!(deleted.deleted_at.is_some());
        assert!(repo.list().await.unwrap().is_empty());
        assert!(matches!(
            repo.rename(shoes.id, "Again", Utc::now()).await,
            Err(StoreError::ConditionFailed { .. })
        ));
        assert!(repo.rename(CategoryId::new(), "Ghost", Utc::now()).await.is_err());
    }
}
