use chronofs::tree::node::NodeKind;
use chronofs::types::{Inode, ROOT_INODE};
use chronofs::StoreError;
use proptest::prelude::*;
use std::collections::HashMap;

use crate::integration::support::{ctx, memory_store};

#[derive(Debug, Clone)]
enum Op {
    Create { dir: usize, name: u8, directory: bool },
    Remove { dir: usize, name: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..8, 0u8..4, any::<bool>()).prop_map(|(dir, name, directory)| Op::Create {
            dir,
            name,
            directory
        }),
        (0usize..8, 0u8..4).prop_map(|(dir, name)| Op::Remove { dir, name }),
    ]
}

/// Expected contents of one directory, in creation order.
#[derive(Debug, Default)]
struct ModelDir {
    entries: Vec<(String, NodeKind, Inode)>,
    unlinked: bool,
}

impl ModelDir {
    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _, _)| n == name)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn random_edits_match_tree_model(ops in prop::collection::vec(op(), 1..60)) {
        let store = memory_store();
        let mut dirs: Vec<Inode> = vec![ROOT_INODE];
        let mut model: HashMap<Inode, ModelDir> = HashMap::new();
        model.insert(ROOT_INODE, ModelDir::default());
        let mut revisions = vec![store.latest_revision(&ctx()).unwrap().revision_id];

        for op in ops {
            match op {
                Op::Create { dir, name, directory } => {
                    let parent = dirs[dir % dirs.len()];
                    let name = format!("n{name}");
                    let kind = if directory { NodeKind::Directory } else { NodeKind::File };
                    let result = store.create_child(&ctx(), parent, &name, kind);
                    let expected = &model[&parent];

                    if expected.unlinked {
                        prop_assert!(matches!(result, Err(StoreError::NotFound(_))), "{result:?}");
                    } else if expected.position(&name).is_some() {
                        prop_assert!(matches!(result, Err(StoreError::AlreadyExists { .. })), "{result:?}");
                    } else {
                        let inode = result.unwrap();
                        if directory {
                            dirs.push(inode);
                            model.insert(inode, ModelDir::default());
                        }
                        model.get_mut(&parent).unwrap().entries.push((name, kind, inode));
                        revisions.push(store.latest_revision(&ctx()).unwrap().revision_id);
                    }
                }
                Op::Remove { dir, name } => {
                    let parent = dirs[dir % dirs.len()];
                    let name = format!("n{name}");
                    let result = store.remove_child(&ctx(), parent, &name);
                    let expected = &model[&parent];

                    if expected.unlinked {
                        prop_assert!(matches!(result, Err(StoreError::NotFound(_))), "{result:?}");
                        continue;
                    }
                    let Some(index) = expected.position(&name) else {
                        prop_assert!(matches!(result, Err(StoreError::NoEntry { .. })), "{result:?}");
                        continue;
                    };
                    let (_, kind, child) = expected.entries[index].clone();
                    let occupied = kind == NodeKind::Directory && !model[&child].entries.is_empty();
                    if occupied {
                        prop_assert!(matches!(result, Err(StoreError::NotEmpty { .. })), "{result:?}");
                    } else {
                        prop_assert!(result.is_ok(), "{result:?}");
                        model.get_mut(&parent).unwrap().entries.remove(index);
                        if let Some(removed) = model.get_mut(&child) {
                            removed.unlinked = true;
                        }
                        revisions.push(store.latest_revision(&ctx()).unwrap().revision_id);
                    }
                }
            }
        }

        prop_assert!(revisions.windows(2).all(|w| w[0] < w[1]));
        let report = store.check_consistency(&ctx()).unwrap();
        prop_assert!(report.is_clean(), "{:?}", report.violations);

        for dir in &dirs {
            let listing: Vec<(String, NodeKind, Inode)> = store
                .readdir(&ctx(), *dir)
                .unwrap()
                .into_iter()
                .map(|entry| (entry.name, entry.kind, entry.inode))
                .collect();
            prop_assert_eq!(&listing, &model[dir].entries);

            let history = store.node_history(&ctx(), *dir).unwrap();
            prop_assert!(history.windows(2).all(|w| w[0].revision_id < w[1].revision_id));
            prop_assert!(history.iter().all(|v| v.kind() == NodeKind::Directory));
        }
    }
}
