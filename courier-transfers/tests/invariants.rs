//! Randomized checks of subtree totals
//!
//! Builds trees through arbitrary sequences of attaches and transport events
//! and checks after every step that each node's totals equal its own values
//! plus its children's totals.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::test_context;
use courier_transfers::{Progress, TransferError, TransferRecord};
use proptest::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Attach { parent: usize, size: u64, dir: bool },
    Bytes { node: usize, bytes: u64 },
    Resize { node: usize, size: u64 },
    Fail { node: usize },
    Discover { node: usize, on: bool },
    Finish { node: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), 0u64..1000, any::<bool>())
            .prop_map(|(parent, size, dir)| Op::Attach { parent, size, dir }),
        4 => (any::<usize>(), 1u64..400).prop_map(|(node, bytes)| Op::Bytes { node, bytes }),
        1 => (any::<usize>(), 0u64..1000).prop_map(|(node, size)| Op::Resize { node, size }),
        1 => any::<usize>().prop_map(|node| Op::Fail { node }),
        1 => (any::<usize>(), any::<bool>()).prop_map(|(node, on)| Op::Discover { node, on }),
        1 => any::<usize>().prop_map(|node| Op::Finish { node }),
    ]
}

fn pick(nodes: &[Arc<TransferRecord>], i: usize) -> Arc<TransferRecord> {
    Arc::clone(&nodes[i % nodes.len()])
}

fn apply(nodes: &mut Vec<Arc<TransferRecord>>, op: &Op, serial: &mut usize) {
    match *op {
        Op::Attach { parent, size, dir } => {
            let parent = pick(nodes, parent);
            *serial += 1;
            let remote = format!("{}/n{serial}", parent.remote_path().trim_end_matches('/'));
            let child = parent.context().download_record(
                None,
                remote,
                format!("/tmp/prop/n{serial}"),
                size,
                dir,
            );
            parent.add_child(Arc::clone(&child)).expect("attach fresh record");
            nodes.push(child);
        }
        Op::Bytes { node, bytes } => pick(nodes, node).report_bytes_transferred(bytes),
        Op::Resize { node, size } => pick(nodes, node).set_size(size),
        Op::Fail { node } => pick(nodes, node).set_error(TransferError::IoError),
        Op::Discover { node, on } => pick(nodes, node).set_discovering_files_to_download(on),
        Op::Finish { node } => pick(nodes, node).finish(),
    }
}

/// Returns (size, transferred, any discovering) for the subtree
fn check_subtree(node: &Arc<TransferRecord>) -> (u64, u64, bool) {
    let mut size = node.size();
    let mut transferred = node.bytes_transferred();
    let mut discovering = node.is_discovering_files_to_download();
    for child in node.children() {
        assert!(Arc::ptr_eq(&child.parent().expect("child has parent"), node));
        let (s, t, d) = check_subtree(&child);
        size += s;
        transferred += t;
        discovering |= d;
    }

    assert_eq!(node.size_with_children(), size, "size of {}", node.remote_path());
    assert_eq!(node.transferred(), transferred, "bytes of {}", node.remote_path());

    let progress = node.progress();
    if discovering {
        assert_eq!(progress, Progress::Indeterminate);
    } else if size > 0 {
        let expected = (u128::from(transferred) * 100 / u128::from(size)).min(100) as u8;
        assert_eq!(progress, Progress::Percent(expected));
    }
    (size, transferred, discovering)
}

proptest! {
    #[test]
    fn totals_match_children_after_every_op(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let ctx = test_context();
        let root = ctx.download_record(None, "/prop/", "/tmp/prop", 0, true);
        let mut nodes = vec![Arc::clone(&root)];
        let mut serial = 0usize;
        let mut last_seen: HashMap<Uuid, u64> = HashMap::new();

        for op in &ops {
            apply(&mut nodes, op, &mut serial);
            check_subtree(&root);

            // Byte counters never move backwards
            for node in &nodes {
                let now = node.transferred();
                let before = last_seen.insert(node.id(), now).unwrap_or(0);
                prop_assert!(
                    now >= before,
                    "{} went from {} to {}",
                    node.remote_path(),
                    before,
                    now
                );
            }
        }

        prop_assert!(Arc::ptr_eq(&nodes[nodes.len() - 1].root(), &root));
        prop_assert!(root.progress().percent().unwrap_or(0) <= 100);
    }

    #[test]
    fn leaf_progress_is_monotonic(
        size in 1u64..10_000,
        chunks in prop::collection::vec(1u64..2_000, 1..40),
    ) {
        let ctx = test_context();
        let leaf = ctx.upload_record(None, "/tmp/leaf", "/leaf", size, false);
        let mut last = 0u8;
        for bytes in chunks {
            leaf.report_bytes_transferred(bytes);
            let percent = leaf.progress().percent().expect("sized leaf has a percentage");
            prop_assert!(percent >= last);
            prop_assert!(percent <= 100);
            last = percent;
        }
        prop_assert_eq!(leaf.is_finished(), leaf.bytes_transferred() >= size);
    }
}
