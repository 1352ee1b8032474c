//! Tree service integration tests.
//!
//! Walks the documented end-to-end scenario and checks the tree properties
//! that must hold after every mutation.

mod common;

use cabinet::{CabinetError, FileAttrs, Item, ItemFilter, ItemUpdate, NewItem};
use cabinet::storage::ObjectGateway;
use common::{setup, TestTree};

/// Every item's path matches its ancestor chain.
async fn assert_paths_consistent(tree: &TestTree, owner: &str) {
    let items = tree.find_all(owner, &ItemFilter::new()).await.unwrap();
    for item in &items {
        let expected = match &item.parent_id {
            None => format!("/{}", item.name),
            Some(parent_id) => {
                let parent: &Item = items.iter().find(|i| &i.id == parent_id).unwrap();
                format!("{}/{}", parent.path, item.name)
            }
        };
        assert_eq!(item.path, expected, "path of {}", item.name);
    }
}

#[tokio::test]
async fn test_documents_scenario() {
    let h = setup().await;
    let owner = "alice";

    h.gateway
        .put_object("alice/1-a.txt", b"hello", "text/plain")
        .await
        .unwrap();

    // 1. Create Docs and a file inside it
    let docs = h.tree.create(owner, NewItem::folder("Docs")).await.unwrap();
    assert_eq!(docs.path, "/Docs");
    let a = h
        .tree
        .create(
            owner,
            NewItem::file("a.txt")
                .with_parent(docs.id.clone())
                .with_file_attrs(FileAttrs::stored(5, "text/plain", "alice/1-a.txt")),
        )
        .await
        .unwrap();
    assert_eq!(a.path, "/Docs/a.txt");

    // 2. Rename cascades
    h.tree
        .update(owner, &docs.id, ItemUpdate::new().name("Documents"))
        .await
        .unwrap();
    let a = h.tree.find_one(owner, &a.id).await.unwrap();
    assert_eq!(a.path, "/Documents/a.txt");

    // 3. A file cannot be a parent
    let result = h
        .tree
        .update(owner, &docs.id, ItemUpdate::new().parent_id(Some(a.id.clone())))
        .await;
    assert!(matches!(result, Err(CabinetError::InvalidOperation(_))));

    // 4. No moving into a descendant
    let sub = h
        .tree
        .create(owner, NewItem::folder("Sub").with_parent(docs.id.clone()))
        .await
        .unwrap();
    let result = h
        .tree
        .update(owner, &docs.id, ItemUpdate::new().parent_id(Some(sub.id.clone())))
        .await;
    assert!(matches!(result, Err(CabinetError::InvalidOperation(_))));
    assert_paths_consistent(&h.tree, owner).await;

    // 5. Delete cascades and releases the object exactly once
    h.tree.remove(owner, &docs.id).await.unwrap();
    for id in [&docs.id, &sub.id, &a.id] {
        assert!(matches!(
            h.tree.find_one(owner, id).await,
            Err(CabinetError::NotFound(_))
        ));
    }
    assert_eq!(h.gateway.delete_count("alice/1-a.txt"), 1);
    assert_eq!(h.gateway.total_deletes(), 1);
    assert!(h.gateway.head_object("alice/1-a.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_sibling_names() {
    let h = setup().await;
    let docs = h.tree.create("alice", NewItem::folder("Docs")).await.unwrap();
    h.tree
        .create("alice", NewItem::file("a.txt").with_parent(docs.id.clone()))
        .await
        .unwrap();

    let result = h
        .tree
        .create("alice", NewItem::file("a.txt").with_parent(docs.id.clone()))
        .await;
    assert!(matches!(result, Err(CabinetError::Conflict(_))));

    // Same name elsewhere, or for another owner, is fine
    h.tree.create("alice", NewItem::file("a.txt")).await.unwrap();
    h.tree.create("bob", NewItem::folder("Docs")).await.unwrap();
}

#[tokio::test]
async fn test_move_conflict_keeps_tree() {
    let h = setup().await;
    let left = h.tree.create("alice", NewItem::folder("Left")).await.unwrap();
    let right = h.tree.create("alice", NewItem::folder("Right")).await.unwrap();
    h.tree
        .create("alice", NewItem::file("x").with_parent(left.id.clone()))
        .await
        .unwrap();
    let other = h
        .tree
        .create("alice", NewItem::file("x").with_parent(right.id.clone()))
        .await
        .unwrap();

    let result = h
        .tree
        .update("alice", &other.id, ItemUpdate::new().parent_id(Some(left.id.clone())))
        .await;
    assert!(matches!(result, Err(CabinetError::Conflict(_))));

    let other = h.tree.find_one("alice", &other.id).await.unwrap();
    assert_eq!(other.path, "/Right/x");
    assert_paths_consistent(&h.tree, "alice").await;
}

#[tokio::test]
async fn test_deep_move_recomputes_all_paths() {
    let h = setup().await;

    let mut parent: Option<String> = None;
    let mut chain = Vec::new();
    for depth in 0..20 {
        let folder = h
            .tree
            .create(
                "alice",
                NewItem::folder(format!("level{depth}")).with_parent_opt(parent.clone()),
            )
            .await
            .unwrap();
        h.tree
            .create("alice", NewItem::file("leaf").with_parent(folder.id.clone()))
            .await
            .unwrap();
        parent = Some(folder.id.clone());
        chain.push(folder);
    }
    let target = h.tree.create("alice", NewItem::folder("Archive")).await.unwrap();

    h.tree
        .update("alice", &chain[1].id, ItemUpdate::new().parent_id(Some(target.id.clone())))
        .await
        .unwrap();

    assert_paths_consistent(&h.tree, "alice").await;
    let deepest = h.tree.find_one("alice", &chain[19].id).await.unwrap();
    assert!(deepest.path.starts_with("/Archive/level1/level2/"));
    assert!(deepest.path.ends_with("/level19"));

    let crumbs = h.tree.breadcrumbs("alice", &chain[19].id).await.unwrap();
    assert_eq!(crumbs.len(), 20);
    assert_eq!(crumbs[0].id, target.id);
    assert!(crumbs[0].parent_id.is_none());
    assert_eq!(crumbs.last().unwrap().id, chain[19].id);
}

#[tokio::test]
async fn test_sibling_ordering() {
    let h = setup().await;
    for name in ["b.txt", "A.txt", "c"] {
        h.tree.create("alice", NewItem::file(name)).await.unwrap();
    }
    for name in ["zed", "Beta"] {
        h.tree.create("alice", NewItem::folder(name)).await.unwrap();
    }

    let roots = h
        .tree
        .find_all("alice", &ItemFilter::new().at_root())
        .await
        .unwrap();
    let names: Vec<_> = roots.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["Beta", "zed", "A.txt", "b.txt", "c"]);

    let tree = h.tree.get_tree("alice").await.unwrap();
    let tree_names: Vec<_> = tree.iter().map(|n| n.item.name.as_str()).collect();
    assert_eq!(tree_names, names);
}

#[tokio::test]
async fn test_remove_releases_each_file_once() {
    let h = setup().await;
    let root = h.tree.create("alice", NewItem::folder("Root")).await.unwrap();
    let inner = h
        .tree
        .create("alice", NewItem::folder("Inner").with_parent(root.id.clone()))
        .await
        .unwrap();

    for (i, parent) in [&root, &inner, &inner].into_iter().enumerate() {
        let key = format!("alice/{i}-f");
        h.gateway.put_object(&key, b"x", "text/plain").await.unwrap();
        h.tree
            .create(
                "alice",
                NewItem::file(format!("f{i}"))
                    .with_parent(parent.id.clone())
                    .with_file_attrs(FileAttrs::stored(1, "text/plain", key)),
            )
            .await
            .unwrap();
    }
    // A file with no stored object releases nothing
    h.tree
        .create("alice", NewItem::file("empty").with_parent(inner.id.clone()))
        .await
        .unwrap();

    h.tree.remove("alice", &root.id).await.unwrap();

    assert_eq!(h.gateway.total_deletes(), 3);
    for i in 0..3 {
        assert_eq!(h.gateway.delete_count(&format!("alice/{i}-f")), 1);
    }
    assert!(h.tree.get_tree("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_owners_are_isolated() {
    let h = setup().await;
    let docs = h.tree.create("alice", NewItem::folder("Docs")).await.unwrap();

    assert!(matches!(
        h.tree.find_one("bob", &docs.id).await,
        Err(CabinetError::NotFound(_))
    ));
    assert!(matches!(
        h.tree
            .update("bob", &docs.id, ItemUpdate::new().name("Mine"))
            .await,
        Err(CabinetError::NotFound(_))
    ));
    assert!(matches!(
        h.tree.breadcrumbs("bob", &docs.id).await,
        Err(CabinetError::NotFound(_))
    ));
    assert!(h.tree.get_tree("bob").await.unwrap().is_empty());
    assert!(h.tree.find_all("bob", &ItemFilter::new()).await.unwrap().is_empty());
}

/// A parent chain corrupted into a cycle is reported, never walked forever.
#[tokio::test]
async fn test_cyclic_parent_chain_is_inconsistent() {
    let h = setup().await;
    let a = h.tree.create("alice", NewItem::folder("A")).await.unwrap();
    let b = h
        .tree
        .create("alice", NewItem::folder("B").with_parent(a.id.clone()))
        .await
        .unwrap();
    let c = h.tree.create("alice", NewItem::folder("C")).await.unwrap();

    sqlx::query("UPDATE items SET parent_id = ? WHERE id = ?")
        .bind(b.id.as_str())
        .bind(a.id.as_str())
        .execute(h.db.pool())
        .await
        .unwrap();

    assert!(matches!(
        h.tree.breadcrumbs("alice", &a.id).await,
        Err(CabinetError::Consistency(_))
    ));
    assert!(matches!(
        h.tree
            .update("alice", &c.id, ItemUpdate::new().parent_id(Some(a.id.clone())))
            .await,
        Err(CabinetError::Consistency(_))
    ));
    assert!(matches!(
        h.tree.remove("alice", &a.id).await,
        Err(CabinetError::Consistency(_))
    ));

    // Only C is still reachable from a root
    let tree = h.tree.get_tree("alice").await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].item.id, c.id);

    // Nothing was moved or removed
    let c = h.tree.find_one("alice", &c.id).await.unwrap();
    assert!(c.parent_id.is_none());
    assert_eq!(h.tree.find_all("alice", &ItemFilter::new()).await.unwrap().len(), 3);
}
