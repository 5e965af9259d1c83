use chronofs::tree::node::NodeKind;
use chronofs::types::ROOT_INODE;
use chronofs::{MetaStore, StoreError};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use crate::integration::support::{ctx, memory_store, names};

#[test]
fn racing_creates_of_same_name_have_one_winner() {
    for _ in 0..20 {
        let store = Arc::new(memory_store());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [NodeKind::File, NodeKind::Directory]
            .into_iter()
            .map(|kind| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.create_child(&ctx(), ROOT_INODE, "x", kind)
                })
            })
            .collect();
        let results: Vec<Result<u64, StoreError>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::AlreadyExists { .. })))
            .count();
        assert_eq!((winners, losers), (1, 1), "{results:?}");
        assert_eq!(names(&store, ROOT_INODE), vec!["x"]);
    }
}

#[test]
fn concurrent_creates_of_distinct_names_all_land() {
    let store = Arc::new(memory_store());
    let threads = 8;
    let per_thread = 10;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store: Arc<MetaStore> = store.clone();
            thread::spawn(move || {
                (0..per_thread)
                    .map(|i| {
                        store
                            .create_child(&ctx(), ROOT_INODE, &format!("t{t}-{i}"), NodeKind::File)
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut inodes = HashSet::new();
    for handle in handles {
        for inode in handle.join().unwrap() {
            assert!(inodes.insert(inode), "inode {inode} handed out twice");
        }
    }
    assert_eq!(inodes.len(), threads * per_thread);
    assert_eq!(names(&store, ROOT_INODE).len(), threads * per_thread);

    // One revision per create, plus bootstrap, in strictly increasing order.
    let revisions = store.revisions(&ctx()).unwrap();
    assert_eq!(revisions.len(), threads * per_thread + 1);
    assert!(revisions.windows(2).all(|w| w[0].revision_id < w[1].revision_id));
    assert!(store.check_consistency(&ctx()).unwrap().is_clean());
}

#[test]
fn readers_run_alongside_writers() {
    let store = Arc::new(memory_store());
    let dir = store
        .create_child(&ctx(), ROOT_INODE, "d", NodeKind::Directory)
        .unwrap();

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..30 {
                store
                    .create_child(&ctx(), dir, &format!("f{i}"), NodeKind::File)
                    .unwrap();
            }
        })
    };
    let reader = {
        let store = store.clone();
        thread::spawn(move || {
            let mut last = 0;
            for _ in 0..50 {
                let count = store.readdir(&ctx(), dir).unwrap().len();
                assert!(count >= last, "listing shrank from {last} to {count}");
                last = count;
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(store.readdir(&ctx(), dir).unwrap().len(), 30);
}

#[test]
fn cancelled_request_is_not_run() {
    let store = memory_store();
    let request = ctx();
    request.cancel();
    let err = store
        .create_child(&request, ROOT_INODE, "x", NodeKind::File)
        .unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
    assert!(names(&store, ROOT_INODE).is_empty());
}
