//! Tree service for Cabinet.
//!
//! This module provides the item operations callers use:
//! - Create, rename/move and cascading delete
//! - Listing, full tree, children and breadcrumbs
//! - Storage usage totals
//!
//! Every mutation of an owner's tree runs inside that owner's mutation scope
//! (see [`OwnerLocks`]) and writes its whole cascade through one store call,
//! so a caller never observes a half-applied move or delete.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::lock::OwnerLocks;
use super::path::{build_path, validate_name};
use super::store::{ItemStore, PathChange};
use super::{
    sort_siblings, FileAttrs, Item, ItemFilter, ItemKind, ItemNode, ItemUpdate, NewItem,
    StorageUsage, MAX_TREE_DEPTH,
};
use crate::storage::ObjectGateway;
use crate::{CabinetError, Result};

/// One folder being assembled while building the tree.
struct Frame {
    item: Item,
    pending: std::vec::IntoIter<Item>,
    built: Vec<ItemNode>,
}

/// Orchestrates item operations on top of an item store and object gateway.
pub struct TreeService<S, G> {
    store: S,
    gateway: Arc<G>,
    locks: OwnerLocks,
}

impl<S, G> TreeService<S, G>
where
    S: ItemStore,
    G: ObjectGateway,
{
    /// Create a new TreeService.
    pub fn new(store: S, gateway: Arc<G>) -> Self {
        Self {
            store,
            gateway,
            locks: OwnerLocks::new(),
        }
    }

    /// Create an item.
    ///
    /// The parent, if given, must be a folder owned by the caller. A sibling
    /// with the same name yields `Conflict`; the caller decides how to rename.
    pub async fn create(&self, owner_id: &str, new_item: NewItem) -> Result<Item> {
        validate_name(&new_item.name)?;
        if new_item.kind == ItemKind::Folder && new_item.file.is_some() {
            return Err(CabinetError::InvalidOperation(
                "folders cannot carry file attributes".to_string(),
            ));
        }

        let _scope = self.locks.acquire(owner_id).await;
        self.insert_in_scope(owner_id, &new_item).await
    }

    /// Create a file item for an object that is already stored.
    ///
    /// The object's size comes from the gateway. The lookup, the reference
    /// check and the insert all run in the owner's mutation scope, the same
    /// scope [`release_if_unreferenced`](Self::release_if_unreferenced) takes,
    /// so an object cannot be reclaimed between its confirmation and the
    /// insert. A key another item already references yields `Conflict`.
    pub async fn create_from_object(
        &self,
        owner_id: &str,
        new_item: NewItem,
        storage_key: &str,
        mime_type: impl Into<String>,
    ) -> Result<Item> {
        validate_name(&new_item.name)?;
        if new_item.kind != ItemKind::File {
            return Err(CabinetError::InvalidOperation(
                "only files can reference a stored object".to_string(),
            ));
        }

        let _scope = self.locks.acquire(owner_id).await;

        let object = self.gateway.head_object(storage_key).await?.ok_or_else(|| {
            CabinetError::StorageInconsistency(format!("no object stored at {storage_key}"))
        })?;
        if self.store.storage_key_in_use(storage_key).await? {
            return Err(CabinetError::Conflict(
                "object is already referenced by an item".to_string(),
            ));
        }

        let new_item =
            new_item.with_file_attrs(FileAttrs::stored(object.size, mime_type, storage_key));
        self.insert_in_scope(owner_id, &new_item).await
    }

    /// Delete a stored object unless an item references it.
    ///
    /// Runs in the mutation scope of `scope_owner`, the owner whose uploads
    /// live under the key. Returns whether the object was deleted.
    pub async fn release_if_unreferenced(
        &self,
        scope_owner: &str,
        storage_key: &str,
    ) -> Result<bool> {
        let _scope = self.locks.acquire(scope_owner).await;

        if self.store.storage_key_in_use(storage_key).await? {
            return Ok(false);
        }
        self.gateway.delete_object(storage_key).await?;
        Ok(true)
    }

    /// List the caller's items, ordered folders first then by name.
    pub async fn find_all(&self, owner_id: &str, filter: &ItemFilter) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .store
            .find_by_owner(owner_id, filter)
            .await?
            .into_iter()
            .filter(|item| filter.matches_search(item))
            .collect();
        sort_siblings(&mut items);
        Ok(items)
    }

    /// Get one of the caller's items.
    ///
    /// Items owned by someone else are reported exactly like missing ones.
    pub async fn find_one(&self, owner_id: &str, id: &str) -> Result<Item> {
        match self.store.find_by_id(id).await? {
            Some(item) if item.owner_id == owner_id => Ok(item),
            _ => Err(CabinetError::NotFound("item".to_string())),
        }
    }

    /// Get an item with its ordered direct children attached.
    ///
    /// Files come back without a children field.
    pub async fn find_with_children(&self, owner_id: &str, id: &str) -> Result<ItemNode> {
        let item = self.find_one(owner_id, id).await?;
        if item.is_file() {
            return Ok(ItemNode::leaf(item));
        }

        let mut children = self.store.find_by_parent(owner_id, Some(id)).await?;
        sort_siblings(&mut children);
        Ok(ItemNode {
            item,
            children: Some(children.into_iter().map(ItemNode::leaf).collect()),
        })
    }

    /// Get the caller's whole forest with children attached recursively.
    pub async fn get_tree(&self, owner_id: &str) -> Result<Vec<ItemNode>> {
        let items = self.store.find_by_owner(owner_id, &ItemFilter::new()).await?;
        let total = items.len();

        let mut by_parent: HashMap<Option<String>, Vec<Item>> = HashMap::new();
        for item in items {
            by_parent.entry(item.parent_id.clone()).or_default().push(item);
        }
        for siblings in by_parent.values_mut() {
            sort_siblings(siblings);
        }

        let mut forest = Vec::new();
        let roots = by_parent.remove(&None).unwrap_or_default();

        for root in roots {
            if root.is_file() {
                forest.push(ItemNode::leaf(root));
                continue;
            }

            let pending = by_parent
                .remove(&Some(root.id.clone()))
                .unwrap_or_default()
                .into_iter();
            let mut stack = vec![Frame {
                item: root,
                pending,
                built: Vec::new(),
            }];

            while let Some(top) = stack.last_mut() {
                match top.pending.next() {
                    Some(child) if child.is_folder() => {
                        if stack.len() >= MAX_TREE_DEPTH {
                            return Err(CabinetError::Consistency(format!(
                                "tree of {owner_id} is deeper than {MAX_TREE_DEPTH} levels"
                            )));
                        }
                        let pending = by_parent
                            .remove(&Some(child.id.clone()))
                            .unwrap_or_default()
                            .into_iter();
                        stack.push(Frame {
                            item: child,
                            pending,
                            built: Vec::new(),
                        });
                    }
                    Some(child) => top.built.push(ItemNode::leaf(child)),
                    None => {
                        let Some(done) = stack.pop() else { break };
                        let node = ItemNode {
                            item: done.item,
                            children: Some(done.built),
                        };
                        match stack.last_mut() {
                            Some(parent) => parent.built.push(node),
                            None => forest.push(node),
                        }
                    }
                }
            }
        }

        let unreachable: usize = by_parent.values().map(Vec::len).sum();
        if unreachable > 0 {
            warn!(
                "{} of {} items of {} are not reachable from a root",
                unreachable, total, owner_id
            );
        }

        debug!("Built tree for {} ({} items)", owner_id, total);
        Ok(forest)
    }

    /// Rename and/or move an item.
    ///
    /// Moving a folder recomputes the path of every descendant; the item and
    /// all descendant paths are written together.
    pub async fn update(&self, owner_id: &str, id: &str, update: ItemUpdate) -> Result<Item> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }

        let _scope = self.locks.acquire(owner_id).await;
        let mut item = self.find_one(owner_id, id).await?;
        if update.is_empty() {
            return Ok(item);
        }

        let parent_path = match &update.parent_id {
            Some(Some(parent_id)) => {
                if parent_id == id {
                    return Err(CabinetError::InvalidOperation(
                        "cannot move an item into itself".to_string(),
                    ));
                }
                let parent = self.load_parent_folder(owner_id, parent_id).await?;
                if item.is_folder() {
                    self.ensure_not_descendant(&item, &parent).await?;
                }
                Some(parent.path)
            }
            Some(None) => None,
            None => match &item.parent_id {
                Some(parent_id) => Some(self.load_parent_folder(owner_id, parent_id).await?.path),
                None => None,
            },
        };

        if let Some(name) = update.name {
            item.name = name;
        }
        if let Some(parent_id) = update.parent_id {
            item.parent_id = parent_id;
        }
        let new_path = build_path(&item.name, parent_path.as_deref());
        let old_path = std::mem::replace(&mut item.path, new_path);

        let cascade = if item.is_folder() && item.path != old_path {
            self.descendant_paths(owner_id, &item).await?
        } else {
            Vec::new()
        };

        let updated = self.store.update(&item, &cascade).await?;
        info!(
            "Updated {} {}: {} -> {} ({} descendants)",
            updated.kind,
            updated.id,
            old_path,
            updated.path,
            cascade.len()
        );
        Ok(updated)
    }

    /// Delete an item; folders take their whole subtree with them.
    ///
    /// Rows go first, all at once, then the storage object of every removed
    /// file is released exactly once. Releasing an absent object succeeds.
    pub async fn remove(&self, owner_id: &str, id: &str) -> Result<()> {
        let _scope = self.locks.acquire(owner_id).await;
        let item = self.find_one(owner_id, id).await?;

        let doomed = if item.is_folder() {
            self.subtree_post_order(owner_id, item).await?
        } else {
            vec![item]
        };
        let ids: Vec<String> = doomed.iter().map(|i| i.id.clone()).collect();
        let removed = self.store.delete(&ids).await?;
        info!("Removed {} ({} items)", id, removed);

        let mut first_error = None;
        for key in doomed
            .iter()
            .filter(|i| i.is_file())
            .filter_map(|i| i.storage_key.as_deref())
        {
            if let Err(e) = self.gateway.delete_object(key).await {
                warn!("Failed to release object {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Get the chain from the root down to an item, inclusive.
    pub async fn breadcrumbs(&self, owner_id: &str, id: &str) -> Result<Vec<Item>> {
        let mut crumbs = Vec::new();
        let mut current = Some(id.to_string());

        while let Some(current_id) = current {
            if crumbs.len() >= MAX_TREE_DEPTH {
                return Err(CabinetError::Consistency(format!(
                    "ancestor chain of {id} exceeds {MAX_TREE_DEPTH} levels"
                )));
            }
            let item = self.find_one(owner_id, &current_id).await?;
            current = item.parent_id.clone();
            crumbs.push(item);
        }

        crumbs.reverse();
        Ok(crumbs)
    }

    /// Sum the sizes of the caller's files.
    pub async fn storage_usage(&self, owner_id: &str) -> Result<StorageUsage> {
        let files = self
            .store
            .find_by_owner(owner_id, &ItemFilter::new().kind(ItemKind::File))
            .await?;

        Ok(StorageUsage {
            total_bytes: files.iter().map(|f| f.size.unwrap_or(0)).sum(),
            file_count: files.len() as u64,
        })
    }

    /// Resolve the parent and insert; the caller holds the owner's scope.
    async fn insert_in_scope(&self, owner_id: &str, new_item: &NewItem) -> Result<Item> {
        let parent_path = match &new_item.parent_id {
            Some(parent_id) => Some(self.load_parent_folder(owner_id, parent_id).await?.path),
            None => None,
        };
        let path = build_path(&new_item.name, parent_path.as_deref());

        let item = self.store.insert(owner_id, new_item, &path).await?;
        info!("Created {} {} at {}", item.kind, item.id, item.path);
        Ok(item)
    }

    /// Load a prospective parent: must exist, be the caller's, be a folder.
    async fn load_parent_folder(&self, owner_id: &str, parent_id: &str) -> Result<Item> {
        let parent = match self.store.find_by_id(parent_id).await? {
            Some(parent) if parent.owner_id == owner_id => parent,
            _ => return Err(CabinetError::NotFound("parent folder".to_string())),
        };
        if !parent.is_folder() {
            return Err(CabinetError::InvalidOperation(
                "parent must be a folder".to_string(),
            ));
        }
        Ok(parent)
    }

    /// Reject moving `moving` under `new_parent` if that parent lies in its subtree.
    async fn ensure_not_descendant(&self, moving: &Item, new_parent: &Item) -> Result<()> {
        let mut current = Some(new_parent.clone());

        for _ in 0..MAX_TREE_DEPTH {
            let Some(node) = current else {
                return Ok(());
            };
            if node.id == moving.id {
                return Err(CabinetError::InvalidOperation(
                    "cannot move a folder into its own descendant".to_string(),
                ));
            }
            current = match node.parent_id {
                Some(parent_id) => self.store.find_by_id(&parent_id).await?,
                None => None,
            };
        }

        Err(CabinetError::Consistency(format!(
            "ancestor chain of {} exceeds {MAX_TREE_DEPTH} levels",
            new_parent.id
        )))
    }

    /// New paths for every descendant of a folder whose path has changed.
    async fn descendant_paths(&self, owner_id: &str, folder: &Item) -> Result<Vec<PathChange>> {
        let mut changes = Vec::new();
        let mut stack = vec![(folder.id.clone(), folder.path.clone(), 1usize)];

        while let Some((parent_id, parent_path, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(CabinetError::Consistency(format!(
                    "subtree of {} is deeper than {MAX_TREE_DEPTH} levels",
                    folder.id
                )));
            }

            let mut children = self.store.find_by_parent(owner_id, Some(&parent_id)).await?;
            sort_siblings(&mut children);
            for child in children.into_iter().rev() {
                let path = build_path(&child.name, Some(&parent_path));
                if child.is_folder() {
                    stack.push((child.id.clone(), path.clone(), depth + 1));
                }
                changes.push(PathChange { id: child.id, path });
            }
        }

        debug!(
            "Recomputed {} descendant paths under {}",
            changes.len(),
            folder.path
        );
        Ok(changes)
    }

    /// A folder's subtree with every item after all of its descendants.
    async fn subtree_post_order(&self, owner_id: &str, root: Item) -> Result<Vec<Item>> {
        let mut pre_order = Vec::new();
        let mut stack = vec![(root, 0usize)];

        while let Some((node, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(CabinetError::Consistency(format!(
                    "subtree of {} is deeper than {MAX_TREE_DEPTH} levels",
                    node.id
                )));
            }
            if node.is_folder() {
                let mut children = self.store.find_by_parent(owner_id, Some(&node.id)).await?;
                sort_siblings(&mut children);
                stack.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
            }
            pre_order.push(node);
        }

        // Reversed pre-order puts every folder after its descendants.
        pre_order.reverse();
        Ok(pre_order)
    }
}
