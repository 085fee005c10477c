//! Integration tests for the compaction tracing feature.
//!
//! These tests verify that compaction decisions, relocations and pass
//! teardown run with a subscriber installed.

#![cfg(feature = "tracing")]

use heap_compact::heap::{ArenaId, ArenaKind, MovingHeap, PagedHeap};
use heap_compact::{CompactionConfig, CompactionCoordinator, CycleKind, GcReason, Participant};

struct Mutator;

impl Participant for Mutator {
    fn needs_conservative_stack_scan(&self) -> bool {
        false
    }
}

fn with_subscriber(f: impl FnOnce()) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    tracing::subscriber::with_default(subscriber, f);
}

#[test]
fn test_refused_cycle_with_tracing() {
    with_subscriber(|| {
        let coordinator = CompactionCoordinator::default();
        assert!(!coordinator.on_cycle_start(
            &[Mutator],
            CycleKind::Conservative,
            GcReason::Conservative
        ));
        coordinator.sample_free_list_bytes(1024);
    });
}

#[test]
fn test_full_pass_with_tracing() {
    with_subscriber(|| {
        let coordinator = CompactionCoordinator::new(CompactionConfig {
            stress: true,
            ..CompactionConfig::default()
        });
        let mut heap = PagedHeap::new();
        let roots = heap.add_page(ArenaId(0), ArenaKind::Normal);
        let tables = heap.add_page(ArenaId(1), ArenaKind::HashTable);
        let slot = heap.allocate(roots, 8).unwrap();
        let outer = heap.allocate(tables, 32).unwrap();
        let inner = heap.allocate(tables, 16).unwrap();
        heap.write_slot(slot, outer);
        heap.write_slot(outer + 8, inner);

        assert!(coordinator.on_cycle_start(&[Mutator], CycleKind::Precise, GcReason::Testing));
        coordinator.add_compactable_arena(ArenaKind::HashTable, [tables]);
        coordinator.register_slot(&heap, slot);
        coordinator.register_slot(&heap, outer + 8);
        coordinator.on_pass_start(&Mutator);

        let to = heap.add_page(ArenaId(1), ArenaKind::HashTable);
        let outer_moved = heap.relocate(outer, to).unwrap();
        coordinator.notify_object_moved(&mut heap, outer, outer_moved);
        let inner_moved = heap.relocate(inner, to).unwrap();
        coordinator.notify_object_moved(&mut heap, inner, inner_moved);
        coordinator.on_participant_finished(&Mutator);

        assert_eq!(heap.read_slot(outer_moved + 8), inner_moved);
        assert!(!coordinator.is_compacting());
    });
}
