//! Tests for the sparse address bitmap.

use heap_compact::{Address, SparseRangeIndex};

const W: usize = SparseRangeIndex::MAX_RANGE;

fn addr(raw: usize) -> Address {
    Address::new(raw)
}

#[test]
fn test_basic_single_point() {
    let base = addr(0x1000);
    let index = SparseRangeIndex::new(base);

    let node = index.has_range(base, 1).unwrap();
    assert!(node.is_set(base));
    assert!(!index.is_set(base + 8));
    assert!(index.has_range(base + 8, 1).is_none());
    assert!(index.has_range(base - 8, 8).is_none());
}

#[test]
fn test_basic_sparse_bitmap() {
    let base = addr(0x8000);
    let mut index = SparseRangeIndex::new(base);
    for i in (0..W).step_by(8) {
        index.add(base + i);
    }
    assert_eq!(index.len(), 1);

    let node = index.has_range(base, W).unwrap();
    for i in 0..W {
        assert_eq!(node.is_set(base + i), i % 8 == 0, "offset {i}");
    }

    // The next chunk hangs off to the right.
    index.add(base + W);
    assert_eq!(index.len(), 2);
    assert!(index.is_set(base + W));
    assert!(!index.is_set(base + W + 8));
}

#[test]
fn test_alternating_bits_across_two_chunks() {
    let base = addr(0x1000);
    let mut index = SparseRangeIndex::new(base);
    for i in (0..2 * W).step_by(2) {
        index.add(base + i);
    }

    assert!(index.has_range(base, 1).is_some());
    assert!(index.has_range(base + 1, 1).is_some());
    assert!(index.has_range(base - 1, 1).is_none());

    // Each node maps one chunk only.
    assert_eq!(index.has_range(base + 1, 1), index.has_range(base + 2, 1));
    assert_ne!(index.has_range(base, 1), index.has_range(base + W, 1));

    let start = index.has_range(base + 2, 20).unwrap();
    for i in (2..2 * W).step_by(2) {
        assert!(start.is_set(base + i));
        assert!(!start.is_set(base + i + 1));
    }
}

#[test]
fn test_sparse_tree_probes() {
    let base = addr(0x1000);
    let double = 2 * W;
    let mut index = SparseRangeIndex::new(base);
    index.add(base - double);
    index.add(base + double);

    let probe = |start: heap_compact::SubtreeRef<'_>| {
        [
            start.is_set(base - double),
            start.is_set(base - double + 1),
            start.is_set(base),
            start.is_set(base + 1),
            start.is_set(base + double),
            start.is_set(base + double + 1),
        ]
    };

    let start = index.has_range(base - double - 2, 20).unwrap();
    assert_eq!(probe(start), [true, false, false, false, false, false]);

    let start = index.has_range(base - double - 2, 2048).unwrap();
    assert_eq!(probe(start), [true, false, true, false, true, false]);

    // Probes outside the queried range walk the subtree below the node.
    let start = index.has_range(base, 20).unwrap();
    assert_eq!(probe(start), [true, false, true, false, true, false]);

    let start = index.has_range(base + W + 2, 2048).unwrap();
    assert_eq!(probe(start), [false, false, false, false, true, false]);
    assert!(!start.is_set(base + W));
}

#[test]
fn test_left_extension_within_horizon() {
    let base = addr(0x1000);
    let mut index = SparseRangeIndex::new(base);
    let start = index.has_range(base, 1).map(|n| n.node());

    // Re-adding is a no-op.
    index.add(base);
    assert_eq!(index.has_range(base, 1).map(|n| n.node()), start);

    // An address just before a single-address node becomes its new base.
    index.add(base - 2);
    assert_eq!(index.has_range(base, 1), index.has_range(base - 2, 1));

    // Outside the chunk width a new node is created to the left.
    let mut index = SparseRangeIndex::new(base);
    index.add(base - W);
    assert_ne!(index.has_range(base, 1), index.has_range(base - 2, 1));

    // Just inside the horizon shares the node; one further does not.
    let mut index = SparseRangeIndex::new(base);
    index.add(base - W + 1);
    assert_eq!(index.has_range(base, 1), index.has_range(base - 2, 1));
    index.add(base - W);
    assert_eq!(index.has_range(base, 1), index.has_range(base - 2, 1));
    assert_ne!(index.has_range(base, 1), index.has_range(base - W, 1));
}

#[test]
fn test_left_extension() {
    let base = addr(0x1_0000);
    let mut index = SparseRangeIndex::new(base);

    // Within reach of a single-point node: absorbed by moving the base down.
    index.add(base - (W - 1));
    assert_eq!(index.len(), 1);
    let node = index.has_range(base - (W - 1), 1).unwrap();
    assert_eq!(node.base(), base - (W - 1));
    assert!(node.is_set(base));

    // The node is a bitmap now and cannot move its base again.
    index.add(base - W);
    assert_eq!(index.len(), 2);
    assert!(index.is_set(base - W));
    assert!(index.is_set(base - (W - 1)));
    assert!(index.is_set(base));
    assert!(!index.is_set(base - 1));
}

#[test]
fn test_left_extension_out_of_reach() {
    let base = addr(0x1_0000);
    let mut index = SparseRangeIndex::new(base);
    index.add(base - W);

    assert_eq!(index.len(), 2);
    assert_eq!(index.has_range(base, 1).unwrap().width(), 1);
    assert!(index.is_set(base - W));
}

#[test]
fn test_added_addresses_are_found_for_any_size() {
    let mut addresses = vec![0x4000, 0x4008, 0x4100, 0x3ff0, 0x9000, 0x2000, 0x20f8, 0x4800];
    let mut index = SparseRangeIndex::new(addr(addresses[0]));
    for &a in &addresses[1..] {
        index.add(addr(a));
    }
    addresses.sort_unstable();

    for &a in &addresses {
        for size in [1, 8, 64, W, 4 * W] {
            let node = index
                .has_range(addr(a), size)
                .unwrap_or_else(|| panic!("no range for {a:#x}+{size}"));
            assert!(node.is_set(addr(a)), "{a:#x} not set via range of {size}");
        }
    }
}

#[test]
fn test_absent_address_is_not_set() {
    let mut index = SparseRangeIndex::new(addr(0x4000));
    index.add(addr(0x4010));
    index.add(addr(0x9000));

    for absent in [0x4008, 0x4018, 0x5000, 0x8ff8, 0x1000] {
        let a = addr(absent);
        if let Some(node) = index.has_range(a, 1) {
            assert!(!node.is_set(a), "{absent:#x} reported set");
        }
        assert!(!index.is_set(a));
    }
}

#[test]
fn test_add_is_idempotent() {
    let once = {
        let mut index = SparseRangeIndex::new(addr(0x4000));
        index.add(addr(0x4020));
        index
    };
    let twice = {
        let mut index = SparseRangeIndex::new(addr(0x4000));
        index.add(addr(0x4020));
        index.add(addr(0x4020));
        index.add(addr(0x4000));
        index
    };

    assert_eq!(once.len(), twice.len());
    for probe in (0x3f00..0x4200).step_by(8) {
        let a = addr(probe);
        assert_eq!(once.is_set(a), twice.is_set(a), "{probe:#x}");
        assert_eq!(
            once.has_range(a, 1).map(|n| n.base()),
            twice.has_range(a, 1).map(|n| n.base())
        );
    }
}

#[test]
fn test_far_apart_addresses_use_different_nodes() {
    let mut index = SparseRangeIndex::new(addr(0x4000));
    index.add(addr(0x4000 + W + 8));

    let first = index.has_range(addr(0x4000), 1).unwrap();
    let second = index.has_range(addr(0x4000 + W + 8), 1).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_same_chunk_shares_node() {
    let mut index = SparseRangeIndex::new(addr(0x1000));
    index.add(addr(0x1002));

    let first = index.has_range(addr(0x1000), 1).unwrap();
    let second = index.has_range(addr(0x1002), 1).unwrap();
    assert_eq!(first, second);
    assert!(first.is_set(addr(0x1000)));
    assert!(second.is_set(addr(0x1002)));
}

#[test]
fn test_adjacent_chunk_gets_new_node() {
    let mut index = SparseRangeIndex::new(addr(0x1000));
    index.add(addr(0x1000 + W));

    assert_ne!(
        index.has_range(addr(0x1000), 1).unwrap(),
        index.has_range(addr(0x1000 + W), 1).unwrap()
    );
}

#[test]
fn test_handles_from_different_indexes_differ() {
    let a = SparseRangeIndex::new(addr(0x1000));
    let b = SparseRangeIndex::new(addr(0x1000));
    assert_ne!(a.has_range(addr(0x1000), 1), b.has_range(addr(0x1000), 1));
}
