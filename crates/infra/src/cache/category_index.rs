//! Category mirror in the cache.
//!
//! Layout:
//! - `category:{id}` hash `{name, parent_id?}`
//! - `categories` set of every live category id
//! - `category:{id}:children` set of child ids
//!
//! Each mutation maps to one batch. Deleting a category also drops its own
//! child-set, and a rebuild writes child-sets only for parents present in the
//! scan, so both paths agree on what a deleted parent's children look like.
//! A rebuild also clears keys of ids the cache still lists but the scan no
//! longer has, and child-sets of parents referenced by live rows but absent
//! themselves, so it repairs a cache that missed a delete batch.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use catalog_core::CategoryId;
use catalog_products::{Category, CategoryView};

use super::{CacheClient, CacheError, CacheOp};

pub const ALL_CATEGORIES_KEY: &str = "categories";

pub fn category_key(id: CategoryId) -> String {
    format!("category:{id}")
}

pub fn children_key(id: CategoryId) -> String {
    format!("category:{id}:children")
}

/// Category index over any [`CacheClient`].
#[derive(Debug, Clone)]
pub struct CategoryIndex<C> {
    cache: C,
}

impl<C: CacheClient> CategoryIndex<C> {
    pub fn new(cache: C) -> Self {
        Self { cache }
    }

    pub async fn insert(&self, category: &Category) -> Result<(), CacheError> {
        self.cache.exec_batch(insert_ops(category)).await
    }

    pub async fn rename(&self, id: CategoryId, name: &str) -> Result<(), CacheError> {
        self.cache
            .exec_batch(vec![CacheOp::HashSetField {
                key: category_key(id),
                field: "name".to_string(),
                value: name.to_string(),
            }])
            .await
    }

    pub async fn remove(&self, category: &Category) -> Result<(), CacheError> {
        self.cache.exec_batch(remove_ops(category)).await
    }

    /// Replace the whole index with `categories`.
    pub async fn rebuild(&self, categories: &[Category]) -> Result<(), CacheError> {
        let cached = self.cache.set_members(ALL_CATEGORIES_KEY).await?;
        self.cache.exec_batch(rebuild_ops(categories, &cached)).await
    }

    /// Every cached category, or `None` when the id-set is empty (a miss).
    pub async fn read_all(&self) -> Result<Option<Vec<CategoryView>>, CacheError> {
        let ids = self.cache.set_members(ALL_CATEGORIES_KEY).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        self.read_members(ids).await.map(Some)
    }

    /// Cached children of `parent`. Never falls back to the store.
    pub async fn read_children(&self, parent: CategoryId) -> Result<Vec<CategoryView>, CacheError> {
        let ids = self.cache.set_members(&children_key(parent)).await?;
        self.read_members(ids).await
    }

    async fn read_members(&self, ids: Vec<String>) -> Result<Vec<CategoryView>, CacheError> {
        let mut views = Vec::with_capacity(ids.len());
        for raw in ids {
            let Ok(id) = raw.parse::<CategoryId>() else {
                warn!(member = %raw, "skipping unparseable category id in cache");
                continue;
            };
            let hash = self.cache.hash_get_all(&category_key(id)).await?;
            // A member without a hash raced a delete; leave it out.
            let Some(name) = hash.get("name") else {
                continue;
            };
            let parent_id = match hash.get("parent_id") {
                Some(p) => match p.parse::<CategoryId>() {
                    Ok(parent) => Some(parent),
                    Err(_) => {
                        warn!(category_id = %id, parent = %p, "unparseable parent id in cache");
                        None
                    }
                },
                None => None,
            };
            views.push(CategoryView {
                id,
                name: name.clone(),
                parent_id,
            });
        }
        Ok(views)
    }
}

fn hash_fields(category: &Category) -> Vec<(String, String)> {
    let mut fields = vec![("name".to_string(), category.name.clone())];
    if let Some(parent) = category.parent_id {
        fields.push(("parent_id".to_string(), parent.to_string()));
    }
    fields
}

pub fn insert_ops(category: &Category) -> Vec<CacheOp> {
    let mut ops = vec![
        CacheOp::HashSet {
            key: category_key(category.id),
            fields: hash_fields(category),
        },
        CacheOp::SetAdd {
            key: ALL_CATEGORIES_KEY.to_string(),
            members: vec![category.id.to_string()],
        },
    ];
    if let Some(parent) = category.parent_id {
        ops.push(CacheOp::SetAdd {
            key: children_key(parent),
            members: vec![category.id.to_string()],
        });
    }
    ops
}

pub fn remove_ops(category: &Category) -> Vec<CacheOp> {
    let mut ops = vec![CacheOp::SetRemove {
        key: ALL_CATEGORIES_KEY.to_string(),
        members: vec![category.id.to_string()],
    }];
    if let Some(parent) = category.parent_id {
        ops.push(CacheOp::SetRemove {
            key: children_key(parent),
            members: vec![category.id.to_string()],
        });
    }
    ops.push(CacheOp::Delete {
        key: category_key(category.id),
    });
    ops.push(CacheOp::Delete {
        key: children_key(category.id),
    });
    ops
}

/// Ops replacing the index with exactly `categories`.
///
/// `cached_ids` are the members of the global set before the rebuild; entries
/// among them that are missing from `categories` lose their hash and child-set.
/// The output depends only on the two inputs, so repeated rebuilds from the
/// same scan leave identical cache content.
pub fn rebuild_ops(categories: &[Category], cached_ids: &[String]) -> Vec<CacheOp> {
    let live: BTreeMap<CategoryId, &Category> = categories.iter().map(|c| (c.id, c)).collect();
    let mut children: BTreeMap<CategoryId, BTreeSet<String>> = BTreeMap::new();
    let mut stale: BTreeSet<CategoryId> = cached_ids
        .iter()
        .filter_map(|raw| raw.parse::<CategoryId>().ok())
        .filter(|id| !live.contains_key(id))
        .collect();
    for category in live.values() {
        match category.parent_id {
            Some(parent) if live.contains_key(&parent) => {
                children
                    .entry(parent)
                    .or_default()
                    .insert(category.id.to_string());
            }
            Some(parent) => {
                stale.insert(parent);
            }
            None => {}
        }
    }

    let mut ops = vec![CacheOp::Delete {
        key: ALL_CATEGORIES_KEY.to_string(),
    }];
    for (id, category) in &live {
        ops.push(CacheOp::Delete {
            key: category_key(*id),
        });
        ops.push(CacheOp::HashSet {
            key: category_key(*id),
            fields: hash_fields(category),
        });
        ops.push(CacheOp::Delete {
            key: children_key(*id),
        });
        if let Some(kids) = children.remove(id) {
            ops.push(CacheOp::SetAdd {
                key: children_key(*id),
                members: kids.into_iter().collect(),
            });
        }
    }
    for id in &stale {
        ops.push(CacheOp::Delete {
            key: category_key(*id),
        });
        ops.push(CacheOp::Delete {
            key: children_key(*id),
        });
    }
    if !live.is_empty() {
        ops.push(CacheOp::SetAdd {
            key: ALL_CATEGORIES_KEY.to_string(),
            members: live.keys().map(ToString::to_string).collect(),
        });
    }
    ops
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::cache::InMemoryCache;
    use catalog_products::NewCategory;

    fn category(new: NewCategory) -> Category {
        Category::create(&new, CategoryId::new(), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn empty_index_reads_as_miss() {
        let index = CategoryIndex::new(Arc::new(InMemoryCache::new()));
        assert_eq!(index.read_all().await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_writes_hash_global_set_and_parent_child_set() {
        let cache = Arc::new(InMemoryCache::new());
        let index = CategoryIndex::new(cache.clone());
        let shoes = category(NewCategory::root("Shoes"));
        let sneakers = category(NewCategory::child("Sneakers", shoes.id));
        index.insert(&shoes).await.unwrap();
        index.insert(&sneakers).await.unwrap();

        let hash = cache.hash_get_all(&category_key(sneakers.id)).await.unwrap();
        assert_eq!(hash["name"], "Sneakers");
        assert_eq!(hash["parent_id"], shoes.id.to_string());
        assert!(!cache.hash_get_all(&category_key(shoes.id)).await.unwrap().contains_key("parent_id"));

        let children = index.read_children(shoes.id).await.unwrap();
        assert_eq!(children, vec![CategoryView::from(&sneakers)]);
        assert_eq!(index.read_all().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn remove_drops_hash_memberships_and_own_child_set() {
        let cache = Arc::new(InMemoryCache::new());
        let index = CategoryIndex::new(cache.clone());
        let shoes = category(NewCategory::root("Shoes"));
        let sneakers = category(NewCategory::child("Sneakers", shoes.id));
        index.insert(&shoes).await.unwrap();
        index.insert(&sneakers).await.unwrap();

        index.remove(&shoes).await.unwrap();
        assert!(!cache.contains_key(&category_key(shoes.id)));
        assert!(!cache.contains_key(&children_key(shoes.id)));
        let all = index.read_all().await.unwrap().unwrap();
        assert_eq!(all, vec![CategoryView::from(&sneakers)]);
    }

    #[test]
    fn rebuild_skips_child_sets_of_absent_parents() {
        let missing_parent = CategoryId::new();
        let orphan = category(NewCategory::child("Sneakers", missing_parent));
        let ops = rebuild_ops(&[orphan], &[]);
        assert!(!ops.iter().any(|op| matches!(
            op,
            CacheOp::SetAdd { key, .. } if *key == children_key(missing_parent)
        )));
    }

    #[tokio::test]
    async fn rename_touches_only_the_name_field() {
        let cache = Arc::new(InMemoryCache::new());
        let index = CategoryIndex::new(cache.clone());
        let shoes = category(NewCategory::root("Shoes"));
        let sneakers = category(NewCategory::child("Sneakers", shoes.id));
        index.insert(&shoes).await.unwrap();
        index.insert(&sneakers).await.unwrap();

        index.rename(sneakers.id, "Trainers").await.unwrap();
        let hash = cache.hash_get_all(&category_key(sneakers.id)).await.unwrap();
        assert_eq!(hash["name"], "Trainers");
        assert_eq!(hash["parent_id"], shoes.id.to_string());
    }

    #[tokio::test]
    async fn rebuild_clears_entries_missing_from_the_scan() {
        let cache = Arc::new(InMemoryCache::new());
        let index = CategoryIndex::new(cache.clone());
        let shoes = category(NewCategory::root("Shoes"));
        let sneakers = category(NewCategory::child("Sneakers", shoes.id));
        index.insert(&shoes).await.unwrap();
        index.insert(&sneakers).await.unwrap();

        // Shoes is gone from the source but its delete never reached the cache.
        index.rebuild(std::slice::from_ref(&sneakers)).await.unwrap();

        assert!(!cache.contains_key(&category_key(shoes.id)));
        assert!(!cache.contains_key(&children_key(shoes.id)));
        assert!(index.read_children(shoes.id).await.unwrap().is_empty());
        assert_eq!(
            index.read_all().await.unwrap().unwrap(),
            vec![CategoryView::from(&sneakers)]
        );
    }
}
