//! Entity trait: identity + continuity across state changes.

use chrono::{DateTime, Utc};

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Entities that are never physically removed, only tombstoned.
///
/// A tombstoned entity is invisible to every read path.
pub trait SoftDeletable: Entity {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn is_live(&self) -> bool {
        self.deleted_at().is_none()
    }
}
