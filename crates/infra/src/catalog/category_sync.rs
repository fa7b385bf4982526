//! Category writes and cache-aside reads.
//!
//! Every mutation writes the store first and then mirrors the result into the
//! cache as one atomic batch. The store is the only conflict detector: a
//! rename or delete of a missing or tombstoned category fails there and never
//! reaches the cache. A failed cache batch does not undo the store write; the
//! index stays stale until [`CategorySynchronizer::rebuild_cache`] runs or the
//! next miss rebuilds it.

use chrono::Utc;
use tracing::{info, warn};

use catalog_core::{CatalogError, CatalogResult, CategoryId};
use catalog_products::{Category, CategoryNode, CategoryView, NewCategory, build_forest};

use super::error::CategorySyncError;
use crate::cache::{CacheClient, CategoryIndex};
use crate::repository::CategoryRepository;
use crate::store::ItemStore;

/// What deleting a category does about its children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Delete regardless; children keep pointing at the tombstoned parent.
    #[default]
    Orphan,
    /// Refuse while the category has live children.
    RejectWithChildren,
}

impl core::str::FromStr for DeletePolicy {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orphan" => Ok(DeletePolicy::Orphan),
            "reject-with-children" => Ok(DeletePolicy::RejectWithChildren),
            other => Err(CatalogError::validation(format!("unknown delete policy: {other}"))),
        }
    }
}

pub struct CategorySynchronizer<S, C> {
    store: CategoryRepository<S>,
    index: CategoryIndex<C>,
    policy: DeletePolicy,
}

impl<S, C> CategorySynchronizer<S, C>
where
    S: ItemStore,
    C: CacheClient,
{
    pub fn new(store: S, cache: C) -> Self {
        Self {
            store: CategoryRepository::new(store),
            index: CategoryIndex::new(cache),
            policy: DeletePolicy::default(),
        }
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn create(&self, new: NewCategory) -> Result<Category, CategorySyncError> {
        let category = Category::create(&new, CategoryId::new(), Utc::now())?;
        self.store.put(&category).await.map_err(CatalogError::from)?;
        info!(category_id = %category.id, parent_id = ?category.parent_id, "category created");

        if let Err(e) = self.index.insert(&category).await {
            warn!(category_id = %category.id, error = %e, "category cache sync failed after create");
            return Err(CategorySyncError::Cache {
                category: Box::new(category),
                source: e.into(),
            });
        }
        Ok(category)
    }

    pub async fn rename(&self, id: CategoryId, name: &str) -> Result<Category, CategorySyncError> {
        catalog_products::category::validate_name(name)?;
        let category = self
            .store
            .rename(id, name.trim(), Utc::now())
            .await
            .map_err(CatalogError::from)?;
        info!(category_id = %id, "category renamed");

        if let Err(e) = self.index.rename(id, &category.name).await {
            warn!(category_id = %id, error = %e, "category cache sync failed after rename");
            return Err(CategorySyncError::Cache {
                category: Box::new(category),
                source: e.into(),
            });
        }
        Ok(category)
    }

    /// Soft-delete a category. Descendants are left in place.
    pub async fn delete(&self, id: CategoryId) -> Result<Category, CategorySyncError> {
        if self.policy == DeletePolicy::RejectWithChildren {
            let children = self.store.children_of(id).await.map_err(CatalogError::from)?;
            if !children.is_empty() {
                return Err(CatalogError::precondition(format!(
                    "category {id} still has {} live children",
                    children.len()
                ))
                .into());
            }
        }

        let category = self
            .store
            .soft_delete(id, Utc::now())
            .await
            .map_err(CatalogError::from)?;
        info!(category_id = %id, "category deleted");

        if let Err(e) = self.index.remove(&category).await {
            warn!(category_id = %id, error = %e, "category cache sync failed after delete");
            return Err(CategorySyncError::Cache {
                category: Box::new(category),
                source: e.into(),
            });
        }
        Ok(category)
    }

    /// All live categories, from the cache when populated.
    ///
    /// An empty index is a miss: the store is scanned and the index rebuilt
    /// from the scan. A cache that cannot be read is bypassed the same way.
    pub async fn read_all(&self) -> CatalogResult<Vec<CategoryView>> {
        match self.index.read_all().await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "category cache read failed; reading from store"),
        }

        let categories = self.store.list().await?;
        if let Err(e) = self.index.rebuild(&categories).await {
            warn!(error = %e, count = categories.len(), "category cache rebuild failed");
        } else {
            info!(count = categories.len(), "category cache rebuilt on miss");
        }
        Ok(categories.iter().map(CategoryView::from).collect())
    }

    /// [`Self::read_all`] grouped into a forest.
    pub async fn read_tree(&self) -> CatalogResult<Vec<CategoryNode>> {
        Ok(build_forest(self.read_all().await?))
    }

    /// Cached children of `parent`. An empty result is final; there is no
    /// store fallback.
    pub async fn read_by_parent(&self, parent: CategoryId) -> CatalogResult<Vec<CategoryView>> {
        Ok(self.index.read_children(parent).await?)
    }

    /// Replace the cache index with the store's current content.
    pub async fn rebuild_cache(&self) -> CatalogResult<usize> {
        let categories = self.store.list().await?;
        self.index.rebuild(&categories).await?;
        info!(count = categories.len(), "category cache rebuilt");
        Ok(categories.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::InMemoryCache;
    use crate::store::InMemoryItemStore;

    fn setup() -> (
        CategorySynchronizer<Arc<InMemoryItemStore>, Arc<InMemoryCache>>,
        Arc<InMemoryItemStore>,
        Arc<InMemoryCache>,
    ) {
        let store = Arc::new(InMemoryItemStore::new());
        let cache = Arc::new(InMemoryCache::new());
        (CategorySynchronizer::new(store.clone(), cache.clone()), store, cache)
    }

    #[test]
    fn delete_policy_parses_config_values() {
        assert_eq!("orphan".parse::<DeletePolicy>().unwrap(), DeletePolicy::Orphan);
        assert_eq!(
            "Reject-With-Children".parse::<DeletePolicy>().unwrap(),
            DeletePolicy::RejectWithChildren
        );
        assert!("cascade".parse::<DeletePolicy>().is_err());
    }

    #[tokio::test]
    async fn store_failure_on_create_leaves_cache_untouched() {
        let (sync, store, cache) = setup();
        store.set_failing(true);
        let err = sync.create(NewCategory::root("Shoes")).await.unwrap_err();
        assert!(matches!(err, CategorySyncError::Store(CatalogError::UpstreamUnavailable { .. })));
        assert_eq!(cache.batch_count(), 0);
    }

    #[tokio::test]
    async fn cache_failure_on_create_keeps_store_row() {
        let (sync, store, cache) = setup();
        cache.set_failing(true);
        let err = sync.create(NewCategory::root("Shoes")).await.unwrap_err();
        let CategorySyncError::Cache { category, .. } = err else {
            panic!("expected cache error");
        };
        assert_eq!(store.row_count(crate::repository::CATEGORIES_TABLE), 1);

        cache.set_failing(false);
        let all = sync.read_all().await.unwrap();
        assert_eq!(all, vec![CategoryView::from(&*category)]);
    }

    #[tokio::test]
    async fn rename_and_delete_of_unknown_category_are_not_found() {
        let (sync, _, cache) = setup();
        let ghost = CategoryId::new();
        let err = sync.rename(ghost, "Boots").await.unwrap_err();
        assert!(matches!(err.catalog_error(), CatalogError::NotFound(_)));
        let err = sync.delete(ghost).await.unwrap_err();
        assert!(matches!(err.catalog_error(), CatalogError::NotFound(_)));
        assert_eq!(cache.batch_count(), 0);
    }

    #[tokio::test]
    async fn second_delete_is_rejected() {
        let (sync, _, _) = setup();
        let shoes = sync.create(NewCategory::root("Shoes")).await.unwrap();
        sync.delete(shoes.id).await.unwrap();
        let err = sync.delete(shoes.id).await.unwrap_err();
        assert!(matches!(err, CategorySyncError::Store(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn rename_updates_cached_name_only() {
        let (sync, _, _) = setup();
        let shoes = sync.create(NewCategory::root("Shoes")).await.unwrap();
        let sneakers = sync.create(NewCategory::child("Sneakers", shoes.id)).await.unwrap();

        sync.rename(sneakers.id, "  Trainers ").await.unwrap();
        let children = sync.read_by_parent(shoes.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "Trainers");
        assert_eq!(children[0].parent_id, Some(shoes.id));
    }

    #[tokio::test]
    async fn reject_policy_blocks_delete_with_live_children() {
        let (sync, _, _) = setup();
        let sync = sync.with_delete_policy(DeletePolicy::RejectWithChildren);
        let shoes = sync.create(NewCategory::root("Shoes")).await.unwrap();
        let sneakers = sync.create(NewCategory::child("Sneakers", shoes.id)).await.unwrap();

        let err = sync.delete(shoes.id).await.unwrap_err();
        assert!(matches!(err.catalog_error(), CatalogError::PreconditionFailed(_)));

        sync.delete(sneakers.id).await.unwrap();
        sync.delete(shoes.id).await.unwrap();
        assert!(sync.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_cache_falls_back_to_store() {
        let (sync, _, cache) = setup();
        sync.create(NewCategory::root("Shoes")).await.unwrap();
        cache.set_failing(true);
        let all = sync.read_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(sync.read_by_parent(all[0].id).await.is_err());
    }

    #[tokio::test]
    async fn read_tree_nests_children() {
        let (sync, _, _) = setup();
        let shoes = sync.create(NewCategory::root("Shoes")).await.unwrap();
        sync.create(NewCategory::child("Sneakers", shoes.id)).await.unwrap();

        let tree = sync.read_tree().await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].category.name, "Sneakers");
    }
}
