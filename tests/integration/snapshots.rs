use chronofs::tree::node::NodeKind;
use chronofs::types::ROOT_INODE;
use chronofs::{Resolution, StoreError};

use crate::integration::support::{ctx, memory_store, names};

#[test]
fn snapshot_view_is_immutable() {
    let store = memory_store();
    let docs = store
        .create_child(&ctx(), ROOT_INODE, "docs", NodeKind::Directory)
        .unwrap();
    store
        .create_child(&ctx(), docs, "one.txt", NodeKind::File)
        .unwrap();
    let pinned_at = store.latest_revision(&ctx()).unwrap().revision_id;
    let snapshot = store.open_snapshot(&ctx(), pinned_at).unwrap();
    let pinned_docs = store.lookup(&ctx(), snapshot, "docs").unwrap().inode;
    assert_ne!(pinned_docs, docs);

    let before_root = store.readdir(&ctx(), snapshot).unwrap();
    let before_docs = store.readdir(&ctx(), pinned_docs).unwrap();

    store
        .create_child(&ctx(), docs, "two.txt", NodeKind::File)
        .unwrap();
    store
        .create_child(&ctx(), ROOT_INODE, "more", NodeKind::Directory)
        .unwrap();
    store.remove_child(&ctx(), docs, "one.txt").unwrap();

    assert_eq!(store.readdir(&ctx(), snapshot).unwrap(), before_root);
    assert_eq!(store.readdir(&ctx(), pinned_docs).unwrap(), before_docs);
    assert_eq!(names(&store, docs), vec!["two.txt"]);

    let attr = store.getattr(&ctx(), pinned_docs).unwrap();
    assert_eq!(attr.resolution, Resolution::Snapshot(pinned_at));
}

#[test]
fn point_in_time_reads_are_stable() {
    let store = memory_store();
    let mut revisions = vec![store.latest_revision(&ctx()).unwrap().revision_id];
    for name in ["a", "b", "c"] {
        store
            .create_child(&ctx(), ROOT_INODE, name, NodeKind::File)
            .unwrap();
        revisions.push(store.latest_revision(&ctx()).unwrap().revision_id);
    }

    let expected: [&[&str]; 4] = [&[], &["a"], &["a", "b"], &["a", "b", "c"]];
    for (revision, want) in revisions.iter().zip(expected) {
        let view = store.open_snapshot(&ctx(), *revision).unwrap();
        assert_eq!(names(&store, view), want, "at revision {revision}");
    }
}

#[test]
fn children_of_snapshot_inherit_the_pin() {
    let store = memory_store();
    let dir = store
        .create_child(&ctx(), ROOT_INODE, "d", NodeKind::Directory)
        .unwrap();
    let pinned_at = store.latest_revision(&ctx()).unwrap().revision_id;
    store.create_child(&ctx(), dir, "later", NodeKind::File).unwrap();

    let snapshot = store.open_snapshot(&ctx(), pinned_at).unwrap();
    let pinned_dir = store.lookup(&ctx(), snapshot, "d").unwrap().inode;
    assert!(store.readdir(&ctx(), pinned_dir).unwrap().is_empty());
    assert!(matches!(
        store.create_child(&ctx(), pinned_dir, "x", NodeKind::File),
        Err(StoreError::ReadOnlySnapshot { .. })
    ));
    assert_eq!(
        store
            .node_history(&ctx(), pinned_dir)
            .unwrap()
            .last()
            .unwrap()
            .revision_id,
        pinned_at
    );
}

#[test]
fn unknown_revision_cannot_be_opened() {
    let store = memory_store();
    let latest = store.latest_revision(&ctx()).unwrap().revision_id;
    let err = store.open_snapshot(&ctx(), latest + 1).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert_eq!(err.to_errno(), libc::ENOENT);
}
