//! Item tree module for Cabinet.
//!
//! This module provides the per-owner file/folder hierarchy:
//! - Item types and the sibling ordering used by every listing
//! - Materialized path construction
//! - The item store abstraction and its SQLite implementation
//! - The tree service enforcing structural invariants

mod lock;
mod path;
mod repository;
mod service;
mod store;

pub use lock::OwnerLocks;
pub use path::{build_path, validate_name};
pub use repository::SqliteItemStore;
pub use service::TreeService;
pub use store::{ItemStore, PathChange};

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length for an item name (in characters).
pub const MAX_NAME_LENGTH: usize = 255;

/// Upper bound on ancestor-chain walks and tree depth.
///
/// Exceeding it means the parent chain is corrupted (a cycle), which is
/// reported as a consistency fault instead of looping.
pub const MAX_TREE_DEPTH: usize = 1024;

/// Kind of a tree node. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A folder that may contain other items.
    Folder,
    /// A file backed by a storage object.
    File,
}

impl ItemKind {
    /// Convert kind to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Folder => "folder",
            ItemKind::File => "file",
        }
    }

    /// Rank used by the sibling ordering: folders first.
    fn rank(&self) -> u8 {
        match self {
            ItemKind::Folder => 0,
            ItemKind::File => 1,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "folder" => Ok(ItemKind::Folder),
            "file" => Ok(ItemKind::File),
            _ => Err(format!("unknown item kind: {s}")),
        }
    }
}

/// A node in exactly one owner's tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique item ID.
    pub id: String,
    /// Name, unique among siblings.
    pub name: String,
    /// File or folder.
    pub kind: ItemKind,
    /// Parent folder ID (None for root items).
    pub parent_id: Option<String>,
    /// Owning principal.
    pub owner_id: String,
    /// Materialized path, e.g. `/Docs/a.txt`.
    pub path: String,
    /// Size in bytes (files only).
    pub size: Option<u64>,
    /// MIME type (files only).
    pub mime_type: Option<String>,
    /// Key of the backing object (files only).
    pub storage_key: Option<String>,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
    /// When the item was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Check if this item is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Check if this item is a file.
    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }
}

/// Total order for siblings: folders before files, then case-insensitive
/// name, then exact name and id as tie-breakers.
pub fn sibling_order(a: &Item, b: &Item) -> Ordering {
    a.kind
        .rank()
        .cmp(&b.kind.rank())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort a list of siblings in place.
pub fn sort_siblings(items: &mut [Item]) {
    items.sort_by(sibling_order);
}

/// Attributes carried only by file items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttrs {
    /// Size in bytes.
    pub size: Option<u64>,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Key of the backing object.
    pub storage_key: Option<String>,
}

impl FileAttrs {
    /// Attributes for a file backed by a stored object.
    pub fn stored(size: u64, mime_type: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self {
            size: Some(size),
            mime_type: Some(mime_type.into()),
            storage_key: Some(storage_key.into()),
        }
    }
}

/// Data for creating a new item.
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Item name.
    pub name: String,
    /// File or folder.
    pub kind: ItemKind,
    /// Parent folder ID (None for root items).
    pub parent_id: Option<String>,
    /// File attributes; must be None for folders.
    pub file: Option<FileAttrs>,
}

impl NewItem {
    /// A new root folder.
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::Folder,
            parent_id: None,
            file: None,
        }
    }

    /// A new root file without attributes.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::File,
            parent_id: None,
            file: None,
        }
    }

    /// Set the parent folder.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the parent folder, or keep the item at root level.
    pub fn with_parent_opt(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Set the file attributes.
    pub fn with_file_attrs(mut self, attrs: FileAttrs) -> Self {
        self.file = Some(attrs);
        self
    }
}

/// Changes for a rename and/or move.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    /// New name.
    pub name: Option<String>,
    /// New parent; `Some(None)` moves the item to root level.
    pub parent_id: Option<Option<String>>,
}

impl ItemUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the parent folder ID.
    pub fn parent_id(mut self, parent_id: Option<impl Into<String>>) -> Self {
        self.parent_id = Some(parent_id.map(Into::into));
        self
    }

    /// Move the item to root level.
    pub fn to_root(mut self) -> Self {
        self.parent_id = Some(None);
        self
    }

    /// Check if any fields are set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.parent_id.is_none()
    }
}

/// Listing filter. Owner scoping is applied separately and always.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Restrict to direct children of a folder; `Some(None)` means root level.
    pub parent_id: Option<Option<String>>,
    /// Restrict to one kind.
    pub kind: Option<ItemKind>,
    /// Case-insensitive substring match on the name.
    pub search: Option<String>,
}

impl ItemFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only direct children of the given folder.
    pub fn in_folder(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(Some(parent_id.into()));
        self
    }

    /// Only root-level items.
    pub fn at_root(mut self) -> Self {
        self.parent_id = Some(None);
        self
    }

    /// Only items of the given kind.
    pub fn kind(mut self, kind: ItemKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Only items whose name contains the given text, ignoring case.
    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Check the name condition against an item.
    pub(crate) fn matches_search(&self, item: &Item) -> bool {
        match &self.search {
            Some(needle) if !needle.is_empty() => {
                item.name.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => true,
        }
    }
}

/// An item with its ordered children attached (folders only).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemNode {
    /// The item itself.
    #[serde(flatten)]
    pub item: Item,
    /// Ordered children; absent for files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ItemNode>>,
}

impl ItemNode {
    /// A node without a children field.
    pub fn leaf(item: Item) -> Self {
        Self {
            item,
            children: None,
        }
    }
}

/// Aggregated storage usage of one owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    /// Sum of file sizes in bytes.
    pub total_bytes: u64,
    /// Number of file items.
    pub file_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str, kind: ItemKind) -> Item {
        let now = Utc::now();
        Item {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            parent_id: None,
            owner_id: "owner".to_string(),
            path: format!("/{name}"),
            size: None,
            mime_type: None,
            storage_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_kind_round_trip_strings() {
        assert_eq!("folder".parse::<ItemKind>().unwrap(), ItemKind::Folder);
        assert_eq!("FILE".parse::<ItemKind>().unwrap(), ItemKind::File);
        assert!("link".parse::<ItemKind>().is_err());
        assert_eq!(ItemKind::Folder.to_string(), "folder");
    }

    #[test]
    fn test_folders_sort_before_files() {
        let mut items = vec![
            item("1", "a.txt", ItemKind::File),
            item("2", "zeta", ItemKind::Folder),
            item("3", "Alpha", ItemKind::Folder),
        ];
        sort_siblings(&mut items);

        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "zeta", "a.txt"]);
    }

    #[test]
    fn test_name_order_ignores_case() {
        let mut items = vec![
            item("1", "beta.txt", ItemKind::File),
            item("2", "Alpha.txt", ItemKind::File),
            item("3", "alpha2.txt", ItemKind::File),
        ];
        sort_siblings(&mut items);

        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha.txt", "alpha2.txt", "beta.txt"]);
    }

    #[test]
    fn test_order_is_total_for_case_variants() {
        let a = item("1", "Readme", ItemKind::File);
        let b = item("2", "readme", ItemKind::File);
        assert_ne!(sibling_order(&a, &b), Ordering::Equal);
        assert_eq!(sibling_order(&a, &b), sibling_order(&b, &a).reverse());
    }

    #[test]
    fn test_filter_search_is_case_insensitive() {
        let filter = ItemFilter::new().search("REPORT");
        assert!(filter.matches_search(&item("1", "q3-report.pdf", ItemKind::File)));
        assert!(!filter.matches_search(&item("2", "notes.md", ItemKind::File)));
        assert!(ItemFilter::new().matches_search(&item("3", "x", ItemKind::File)));
    }

    #[test]
    fn test_item_update_builder() {
        let update = ItemUpdate::new().name("Documents").parent_id(Some("p1"));
        assert_eq!(update.name.as_deref(), Some("Documents"));
        assert_eq!(update.parent_id, Some(Some("p1".to_string())));
        assert!(!update.is_empty());

        let update = ItemUpdate::new().to_root();
        assert_eq!(update.parent_id, Some(None));
        assert!(ItemUpdate::new().is_empty());
    }

    #[test]
    fn test_file_node_serializes_without_children() {
        let node = ItemNode::leaf(item("1", "a.txt", ItemKind::File));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "file");
        assert!(json.get("children").is_none());
    }
}
