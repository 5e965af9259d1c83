use chronofs::tree::node::NodeKind;
use chronofs::types::ROOT_INODE;
use chronofs::{DirEntry, StoreError};

use crate::integration::support::{ctx, memory_store, names};

#[test]
fn concrete_scenario_from_empty_store() {
    let store = memory_store();
    let ctx = ctx();
    let r0 = store.latest_revision(&ctx).unwrap().revision_id;
    let snapshot_before = store.open_snapshot(&ctx, r0).unwrap();

    let i1 = store
        .create_child(&ctx, ROOT_INODE, "a", NodeKind::Directory)
        .unwrap();
    assert!(matches!(
        store.create_child(&ctx, ROOT_INODE, "a", NodeKind::File),
        Err(StoreError::AlreadyExists { .. })
    ));
    assert_eq!(
        store.readdir(&ctx, ROOT_INODE).unwrap(),
        vec![DirEntry {
            name: "a".to_string(),
            inode: i1,
            kind: NodeKind::Directory,
        }]
    );

    let i2 = store
        .create_child(&ctx, i1, "b.txt", NodeKind::File)
        .unwrap();
    assert_eq!(
        store.readdir(&ctx, i1).unwrap(),
        vec![DirEntry {
            name: "b.txt".to_string(),
            inode: i2,
            kind: NodeKind::File,
        }]
    );

    assert!(store.readdir(&ctx, snapshot_before).unwrap().is_empty());
}

#[test]
fn root_resolves_to_directory_after_repeated_bootstrap() {
    let store = memory_store();
    for _ in 0..5 {
        assert!(!store.ensure_root(&ctx()).unwrap());
    }
    let attr = store.getattr(&ctx(), ROOT_INODE).unwrap();
    assert_eq!(attr.kind, NodeKind::Directory);
    assert_eq!(store.revisions(&ctx()).unwrap().len(), 1);
}

#[test]
fn lookup_and_readdir_reuse_inodes() {
    let store = memory_store();
    let created = store
        .create_child(&ctx(), ROOT_INODE, "x", NodeKind::File)
        .unwrap();
    for _ in 0..3 {
        assert_eq!(store.lookup(&ctx(), ROOT_INODE, "x").unwrap().inode, created);
        assert_eq!(store.readdir(&ctx(), ROOT_INODE).unwrap()[0].inode, created);
    }
}

#[test]
fn readdir_keeps_creation_order() {
    let store = memory_store();
    for name in ["zeta", "alpha", "mid"] {
        store
            .create_child(&ctx(), ROOT_INODE, name, NodeKind::File)
            .unwrap();
    }
    assert_eq!(names(&store, ROOT_INODE), vec!["zeta", "alpha", "mid"]);
}

#[test]
fn kinds_never_change_across_history() {
    let store = memory_store();
    let dir = store
        .create_child(&ctx(), ROOT_INODE, "d", NodeKind::Directory)
        .unwrap();
    let file = store.create_child(&ctx(), dir, "f", NodeKind::File).unwrap();
    for i in 0..5 {
        store
            .create_child(&ctx(), dir, &format!("g{i}"), NodeKind::File)
            .unwrap();
    }
    store.remove_child(&ctx(), dir, "g0").unwrap();

    let history = store.node_history(&ctx(), dir).unwrap();
    assert_eq!(history.len(), 8);
    assert!(history.iter().all(|v| v.kind() == NodeKind::Directory));
    assert!(history.windows(2).all(|w| w[0].revision_id < w[1].revision_id));

    let file_history = store.node_history(&ctx(), file).unwrap();
    assert_eq!(file_history.len(), 1);
    assert_eq!(file_history[0].kind(), NodeKind::File);

    assert!(store.check_consistency(&ctx()).unwrap().is_clean());
}

#[test]
fn directory_with_late_children_is_not_removed() {
    let store = memory_store();
    let outer = store
        .create_child(&ctx(), ROOT_INODE, "outer", NodeKind::Directory)
        .unwrap();
    let inner = store
        .create_child(&ctx(), outer, "inner", NodeKind::Directory)
        .unwrap();
    // From here on only "inner" changes; "outer" and root keep their versions.
    store
        .create_child(&ctx(), inner, "leaf", NodeKind::File)
        .unwrap();

    assert!(matches!(
        store.remove_child(&ctx(), outer, "inner"),
        Err(StoreError::NotEmpty { .. })
    ));
    assert!(matches!(
        store.remove_child(&ctx(), ROOT_INODE, "outer"),
        Err(StoreError::NotEmpty { .. })
    ));
    assert_eq!(names(&store, inner), vec!["leaf"]);

    store.remove_child(&ctx(), inner, "leaf").unwrap();
    store.remove_child(&ctx(), outer, "inner").unwrap();
    store.remove_child(&ctx(), ROOT_INODE, "outer").unwrap();
    assert!(names(&store, ROOT_INODE).is_empty());
    assert!(store.check_consistency(&ctx()).unwrap().is_clean());
}

#[test]
fn errors_map_to_posix_codes() {
    let store = memory_store();
    let file = store
        .create_child(&ctx(), ROOT_INODE, "f", NodeKind::File)
        .unwrap();

    let not_dir = store.lookup(&ctx(), file, "x").unwrap_err();
    assert_eq!(not_dir.to_errno(), libc::ENOTDIR);

    let missing = store.lookup(&ctx(), ROOT_INODE, "nope").unwrap_err();
    assert_eq!(missing.to_errno(), libc::ENOENT);

    let stale = store.getattr(&ctx(), 123_456).unwrap_err();
    assert_eq!(stale.to_errno(), libc::ESTALE);

    let exists = store
        .create_child(&ctx(), ROOT_INODE, "f", NodeKind::Directory)
        .unwrap_err();
    assert_eq!(exists.to_errno(), libc::EEXIST);
}
