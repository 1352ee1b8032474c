//! Item store abstraction.
//!
//! The tree service talks to persistence only through [`ItemStore`], so the
//! backing record store can be swapped. Implementations must enforce sibling
//! name uniqueness `(owner_id, parent_id, name)` atomically and report a
//! violation as [`CabinetError::Conflict`](crate::CabinetError::Conflict).

use std::future::Future;

use super::{Item, ItemFilter, NewItem};
use crate::Result;

/// A recomputed path for one descendant during a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    /// Descendant item ID.
    pub id: String,
    /// Its new materialized path.
    pub path: String,
}

/// Trait for item persistence.
pub trait ItemStore: Send + Sync {
    /// Insert a new item with a precomputed path.
    ///
    /// Fails with `Conflict` if a sibling with the same name exists.
    fn insert(
        &self,
        owner_id: &str,
        item: &NewItem,
        path: &str,
    ) -> impl Future<Output = Result<Item>> + Send;

    /// Get an item by ID regardless of owner.
    fn find_by_id(&self, id: &str) -> impl Future<Output = Result<Option<Item>>> + Send;

    /// List direct children of a folder, or root items when `parent_id` is None.
    fn find_by_parent(
        &self,
        owner_id: &str,
        parent_id: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Item>>> + Send;

    /// List an owner's items matching the parent and kind conditions of the filter.
    ///
    /// Name search and ordering are applied by the caller.
    fn find_by_owner(
        &self,
        owner_id: &str,
        filter: &ItemFilter,
    ) -> impl Future<Output = Result<Vec<Item>>> + Send;

    /// Persist a renamed/moved item together with its descendants' new paths.
    ///
    /// All rows change or none do.
    fn update(
        &self,
        item: &Item,
        cascade: &[PathChange],
    ) -> impl Future<Output = Result<Item>> + Send;

    /// Delete the given items in order, all or nothing.
    ///
    /// Returns the number of rows removed.
    fn delete(&self, ids: &[String]) -> impl Future<Output = Result<u64>> + Send;

    /// Check whether any item references the given storage key.
    fn storage_key_in_use(&self, storage_key: &str) -> impl Future<Output = Result<bool>> + Send;
}
