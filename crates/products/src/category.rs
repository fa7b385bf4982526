use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalog_core::{CatalogError, CatalogResult, CategoryId, Entity, SoftDeletable};

/// A node in the category forest. `parent_id == None` marks a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CategoryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Category {
    pub fn create(new: &NewCategory, id: CategoryId, now: DateTime<Utc>) -> CatalogResult<Self> {
        new.validate()?;
        if new.parent_id == Some(id) {
            return Err(CatalogError::validation("category cannot be its own parent"));
        }
        Ok(Self {
            id,
            name: new.name.trim().to_string(),
            parent_id: new.parent_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

impl Entity for Category {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDeletable for Category {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// Input: create a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

impl NewCategory {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_id: None,
        }
    }

    pub fn child(name: impl Into<String>, parent_id: CategoryId) -> Self {
        Self {
            name: name.into(),
            parent_id: Some(parent_id),
        }
    }

    pub fn validate(&self) -> CatalogResult<()> {
        validate_name(&self.name)
    }
}

pub fn validate_name(name: &str) -> CatalogResult<()> {
    if name.trim().is_empty() {
        return Err(CatalogError::validation("category name cannot be empty"));
    }
    Ok(())
}

/// The denormalized shape a category has in the read cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryView {
    pub id: CategoryId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CategoryId>,
}

impl From<&Category> for CategoryView {
    fn from(c: &Category) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            parent_id: c.parent_id,
        }
    }
}

/// A category with its live children, for tree presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: CategoryView,
    pub children: Vec<CategoryNode>,
}

/// Group a flat category list into a forest.
///
/// Roots are categories without a parent, plus orphans whose parent is not in
/// the list (e.g. the parent was deleted without cascading). Categories caught
/// in a parent cycle are surfaced as roots so that nothing is dropped. Siblings
/// are ordered by name, then id.
pub fn build_forest(categories: Vec<CategoryView>) -> Vec<CategoryNode> {
    let present: HashSet<CategoryId> = categories.iter().map(|c| c.id).collect();
    let mut by_id: HashMap<CategoryId, CategoryView> = HashMap::with_capacity(categories.len());
    let mut children: HashMap<CategoryId, Vec<CategoryId>> = HashMap::new();
    let mut roots: Vec<CategoryId> = Vec::new();

    for category in categories {
        match category.parent_id {
            Some(parent) if present.contains(&parent) => {
                children.entry(parent).or_default().push(category.id);
            }
            _ => roots.push(category.id),
        }
        by_id.insert(category.id, category);
    }

    let sort_key = |id: &CategoryId| by_id.get(id).map(|c| (c.name.clone(), *id));
    let mut ordered_children: HashMap<CategoryId, Vec<CategoryId>> = HashMap::new();
    for (parent, mut kids) in children {
        kids.sort_by_key(sort_key);
        ordered_children.insert(parent, kids);
    }
    roots.sort_by_key(sort_key);

    let mut visited = HashSet::new();
    let mut forest: Vec<CategoryNode> = roots
        .iter()
        .filter_map(|id| build_node(*id, &by_id, &ordered_children, &mut visited))
        .collect();

    // Anything unvisited sits on a cycle; break it at the smallest id.
    let leftovers: BTreeSet<CategoryId> = by_id
        .keys()
        .filter(|id| !visited.contains(*id))
        .copied()
        .collect();
    for id in leftovers {
        if let Some(node) = build_node(id, &by_id, &ordered_children, &mut visited) {
            forest.push(node);
        }
    }

    forest
}

fn build_node(
    id: CategoryId,
    by_id: &HashMap<CategoryId, CategoryView>,
    children: &HashMap<CategoryId, Vec<CategoryId>>,
    visited: &mut HashSet<CategoryId>,
) -> Option<CategoryNode> {
    if !visited.insert(id) {
        return None;
    }
    let category = by_id.get(&id)?.clone();
    let kids = children
        .get(&id)
        .map(|ids| {
            ids.iter()
                .filter_map(|child| build_node(*child, by_id, children, visited))
                .collect()
        })
        .unwrap_or_default();
    Some(CategoryNode {
        category,
        children: kids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, parent: Option<CategoryId>) -> CategoryView {
        let new = NewCategory {
            name: name.to_string(),
            parent_id: parent,
        };
        CategoryView::from(&Category::create(&new, CategoryId::new(), Utc::now()).unwrap())
    }

    #[test]
    fn create_rejects_blank_name_and_self_parent() {
        assert!(Category::create(&NewCategory::root("  "), CategoryId::new(), Utc::now()).is_err());

        let id = CategoryId::new();
        let err = Category::create(&NewCategory::child("Loop", id), id, Utc::now()).unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn single_root_has_no_children() {
        let shoes = category("Shoes", None);
        let forest = build_forest(vec![shoes.clone()]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].category, shoes);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn children_are_nested_and_sorted_by_name() {
        let shoes = category("Shoes", None);
        let sneakers = category("Sneakers", Some(shoes.id));
        let boots = category("Boots", Some(shoes.id));
        let hats = category("Hats", None);

        let forest = build_forest(vec![sneakers, hats, shoes.clone(), boots]);
        let names: Vec<&str> = forest.iter().map(|n| n.category.name.as_str()).collect();
        assert_eq!(names, vec!["Hats", "Shoes"]);

        let shoe_children: Vec<&str> = forest[1]
            .children
            .iter()
            .map(|n| n.category.name.as_str())
            .collect();
        assert_eq!(shoe_children, vec!["Boots", "Sneakers"]);
    }

    #[test]
    fn orphan_with_missing_parent_becomes_root() {
        let deleted_parent = CategoryId::new();
        let sneakers = category("Sneakers", Some(deleted_parent));
        let forest = build_forest(vec![sneakers.clone()]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].category.id, sneakers.id);
    }

    #[test]
    fn cycle_members_are_not_dropped() {
        let mut a = category("A", None);
        let mut b = category("B", None);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);

        let forest = build_forest(vec![a, b]);
        fn count(nodes: &[CategoryNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }
        assert_eq!(count(&forest), 2);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn count(nodes: &[CategoryNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }

        proptest! {
            /// Property: every category appears in the forest exactly once,
            /// whatever its parent links point at.
            #[test]
            fn forest_contains_every_category_once(links in proptest::collection::vec(proptest::option::of(any::<usize>()), 0..30)) {
                let mut views: Vec<CategoryView> = (0..links.len())
                    .map(|i| category(&format!("c{i}"), None))
                    .collect();
                let ids: Vec<CategoryId> = views.iter().map(|v| v.id).collect();
                for (view, link) in views.iter_mut().zip(&links) {
                    view.parent_id = link.map(|i| ids[i % ids.len()]);
                }

                let forest = build_forest(views);
                prop_assert_eq!(count(&forest), ids.len());
            }
        }
    }
}
