//! Participants finishing a pass from several threads.

use std::sync::{Arc, Barrier};
use std::thread;

use heap_compact::heap::{ArenaId, ArenaKind, MovingHeap, PagedHeap};
use heap_compact::{CompactionConfig, CompactionCoordinator, CycleKind, GcReason, Participant};

struct Worker;

impl Participant for Worker {
    fn needs_conservative_stack_scan(&self) -> bool {
        false
    }
}

fn stress() -> Arc<CompactionCoordinator> {
    Arc::new(CompactionCoordinator::new(CompactionConfig {
        stress: true,
        ..CompactionConfig::default()
    }))
}

#[test]
fn test_last_finisher_tears_down() {
    const THREADS: usize = 8;
    let coordinator = stress();
    let workers: Vec<Worker> = (0..THREADS).map(|_| Worker).collect();
    assert!(coordinator.on_cycle_start(&workers, CycleKind::Precise, GcReason::Testing));
    assert_eq!(coordinator.participant_count(), THREADS);

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                coordinator.on_pass_start(&Worker);
                barrier.wait();
                coordinator.on_participant_finished(&Worker);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!coordinator.is_compacting());
    assert_eq!(coordinator.participant_count(), 0);
    assert_eq!(coordinator.metrics().total_passes(), 1);
}

#[test]
fn test_repeated_passes_across_threads() {
    const THREADS: usize = 4;
    const PASSES: usize = 20;
    let coordinator = stress();
    let workers: Vec<Worker> = (0..THREADS).map(|_| Worker).collect();

    for _ in 0..PASSES {
        assert!(coordinator.on_cycle_start(&workers, CycleKind::Precise, GcReason::Testing));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || coordinator.on_participant_finished(&Worker))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!coordinator.is_compacting());
    }
    assert_eq!(coordinator.metrics().total_passes(), PASSES);
}

#[test]
fn test_relocation_on_one_thread_finish_on_others() {
    const THREADS: usize = 4;
    let coordinator = stress();
    let workers: Vec<Worker> = (0..THREADS).map(|_| Worker).collect();

    let mut heap = PagedHeap::new();
    let roots = heap.add_page(ArenaId(0), ArenaKind::Normal);
    let tables = heap.add_page(ArenaId(1), ArenaKind::HashTable);
    let slot = heap.allocate(roots, 8).unwrap();
    let table = heap.allocate(tables, 64).unwrap();
    heap.write_slot(slot, table);

    assert!(coordinator.on_cycle_start(&workers, CycleKind::Precise, GcReason::Testing));
    coordinator.add_compactable_arena(ArenaKind::HashTable, [tables]);
    coordinator.register_slot(&heap, slot);

    let to = heap.add_page(ArenaId(1), ArenaKind::HashTable);
    let moved = heap.relocate(table, to).unwrap();
    coordinator.notify_object_moved(&mut heap, table, moved);
    assert_eq!(heap.read_slot(slot), moved);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.on_participant_finished(&Worker))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = coordinator.last_compaction_stats().unwrap();
    assert_eq!(stats.objects_relocated, 1);
}

#[test]
fn test_registration_racing_teardown_leaves_no_table() {
    const REGISTRARS: usize = 4;
    const ROUNDS: usize = 50;
    let coordinator = stress();

    for _ in 0..ROUNDS {
        assert!(coordinator.on_cycle_start(&[Worker], CycleKind::Precise, GcReason::Testing));
        let barrier = Arc::new(Barrier::new(REGISTRARS + 1));
        let handles: Vec<_> = (0..REGISTRARS)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut heap = PagedHeap::new();
                    let roots = heap.add_page(ArenaId(0), ArenaKind::Normal);
                    let tables = heap.add_page(ArenaId(1), ArenaKind::HashTable);
                    let slot = heap.allocate(roots, 8).unwrap();
                    let table = heap.allocate(tables, 16).unwrap();
                    heap.write_slot(slot, table);

                    barrier.wait();
                    for _ in 0..200 {
                        coordinator.register_slot(&heap, slot);
                    }
                })
            })
            .collect();

        barrier.wait();
        coordinator.on_participant_finished(&Worker);
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(!coordinator.is_compacting());
        assert!(!coordinator.has_fixup_table());
        assert_eq!(coordinator.tracked_objects(), 0);
    }
}
