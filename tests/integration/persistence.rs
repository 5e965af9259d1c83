use chronofs::tree::node::NodeKind;
use chronofs::types::ROOT_INODE;
use chronofs::MetaStore;
use tempfile::TempDir;

use crate::integration::support::{ctx, durable_options, names};

#[test]
fn tree_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");

    let (dir, file, latest) = {
        let store = MetaStore::open_path(&path, &durable_options()).unwrap();
        let dir = store
            .create_child(&ctx(), ROOT_INODE, "a", NodeKind::Directory)
            .unwrap();
        let file = store
            .create_child(&ctx(), dir, "b.txt", NodeKind::File)
            .unwrap();
        let latest = store.latest_revision(&ctx()).unwrap();
        store.close().unwrap();
        (dir, file, latest)
    };

    let store = MetaStore::open_path(&path, &durable_options()).unwrap();
    assert_eq!(store.latest_revision(&ctx()).unwrap(), latest);
    assert_eq!(names(&store, ROOT_INODE), vec!["a"]);
    assert_eq!(store.lookup(&ctx(), ROOT_INODE, "a").unwrap().inode, dir);
    assert_eq!(store.lookup(&ctx(), dir, "b.txt").unwrap().inode, file);
    assert!(store.check_consistency(&ctx()).unwrap().is_clean());
}

#[test]
fn ids_are_never_reissued_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");

    let first = {
        let store = MetaStore::open_path(&path, &durable_options()).unwrap();
        let inode = store
            .create_child(&ctx(), ROOT_INODE, "one", NodeKind::File)
            .unwrap();
        let revision = store.latest_revision(&ctx()).unwrap().revision_id;
        // Dropped without close: leased blocks are released best effort.
        drop(store);
        (inode, revision)
    };

    let store = MetaStore::open_path(&path, &durable_options()).unwrap();
    let inode = store
        .create_child(&ctx(), ROOT_INODE, "two", NodeKind::File)
        .unwrap();
    let revision = store.latest_revision(&ctx()).unwrap().revision_id;
    assert!(inode > first.0);
    assert!(revision > first.1);
}

#[test]
fn snapshots_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");

    let (snapshot, pinned_at) = {
        let store = MetaStore::open_path(&path, &durable_options()).unwrap();
        let pinned_at = store.latest_revision(&ctx()).unwrap().revision_id;
        let snapshot = store.open_snapshot(&ctx(), pinned_at).unwrap();
        store
            .create_child(&ctx(), ROOT_INODE, "later", NodeKind::File)
            .unwrap();
        store.close().unwrap();
        (snapshot, pinned_at)
    };

    let store = MetaStore::open_path(&path, &durable_options()).unwrap();
    assert_eq!(store.open_snapshot(&ctx(), pinned_at).unwrap(), snapshot);
    assert!(store.readdir(&ctx(), snapshot).unwrap().is_empty());
    assert_eq!(names(&store, ROOT_INODE), vec!["later"]);
}
