//! Heap compaction bookkeeping.
//!
//! - [`sparse`]: sparse address bitmap used to find interior slots
//! - [`fixups`]: per-pass slot registration and relocation
//! - [`coordinator`]: compaction decision and pass lifetime

pub mod coordinator;
pub mod fixups;
pub mod sparse;

#[cfg(feature = "tracing")]
pub mod tracing;

pub use coordinator::{
    default_enabled_condition, CompactionConfig, CompactionCoordinator, CompactionPhase,
    CycleKind, EnabledCondition, GcReason, Participant, DEFAULT_FREE_LIST_THRESHOLD,
    DEFAULT_INTERVAL_THRESHOLD,
};
pub use fixups::{FixupTable, MoveCallback};
pub use sparse::{NodeId, SparseRangeIndex, SubtreeRef};
