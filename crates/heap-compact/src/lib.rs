//! Heap compaction bookkeeping for moving garbage collectors.
//!
//! `heap-compact` tracks which slots reference movable objects while a
//! collector marks, and patches those slots as the collector moves objects
//! during a compaction pass. It does not move memory itself: the collector
//! reports every move and supplies slot access through [`heap::MovingHeap`].
//!
//! # Components
//!
//! - [`SparseRangeIndex`]: a sparse bitmap over heap addresses, organised as
//!   an unbalanced binary tree of 256-address chunks
//! - [`FixupTable`]: object -> slot fixups, interior slot relocation,
//!   post-move callbacks and cross-region relocations for one pass
//! - [`CompactionCoordinator`]: decides which cycles compact and owns the
//!   fixup table for the duration of a pass
//!
//! # Quick Start
//!
//! ```
//! use heap_compact::heap::{ArenaId, ArenaKind, MovingHeap, PagedHeap};
//! use heap_compact::{CompactionConfig, CompactionCoordinator, CycleKind, GcReason, Participant};
//!
//! struct MainThread;
//! impl Participant for MainThread {
//!     fn needs_conservative_stack_scan(&self) -> bool {
//!         false
//!     }
//! }
//!
//! let coordinator = CompactionCoordinator::new(CompactionConfig::default());
//! let mut heap = PagedHeap::new();
//! let tables = heap.add_page(ArenaId(1), ArenaKind::HashTable);
//!
//! // Enough cycles and enough free-list residency make a cycle compact.
//! for _ in 0..10 {
//!     coordinator.on_cycle_start(&[MainThread], CycleKind::Precise, GcReason::Precise);
//!     coordinator.sample_free_list_bytes(1024 * 1024);
//! }
//! assert!(coordinator.on_cycle_start(&[MainThread], CycleKind::Precise, GcReason::Precise));
//!
//! coordinator.add_compactable_arena(ArenaKind::HashTable, [tables]);
//! coordinator.on_pass_start(&MainThread);
//! coordinator.on_participant_finished(&MainThread);
//! assert!(!coordinator.is_compacting());
//! ```
//!
//! # Thread Safety
//!
//! [`CompactionCoordinator`] is `Send + Sync` and is shared by reference with
//! every participant. The fixup table itself is only touched by one
//! participant at a time: registration happens while marking, relocation
//! while compacting, and the participant countdown separates passes.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod compact;
pub mod heap;
pub mod metrics;
pub mod tracing;

// Re-export public API
pub use address::Address;
pub use compact::{
    default_enabled_condition, CompactionConfig, CompactionCoordinator, CompactionPhase,
    CycleKind, EnabledCondition, FixupTable, GcReason, MoveCallback, Participant,
    SparseRangeIndex, SubtreeRef, DEFAULT_FREE_LIST_THRESHOLD, DEFAULT_INTERVAL_THRESHOLD,
};
pub use metrics::{CompactionMetrics, CompactionStats};
pub use tracing::PassId;
