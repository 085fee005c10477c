//! Compaction pass coordination.
//!
//! [`CompactionCoordinator`] decides, at the start of every collection cycle,
//! whether the cycle also compacts. While a pass is running it owns the
//! [`FixupTable`] and forwards registrations and move notifications to it.
//! The pass ends when every participant has reported completion; the last one
//! to finish tears the table down and publishes the pass statistics.
//!
//! State machine: `Idle -> Deciding -> Compacting -> Idle`. `Deciding` falls
//! back to `Idle` whenever the cycle is not eligible.
//!
//! Registration and relocation for one pass are expected to happen in
//! separate phases; the participant countdown is the only synchronisation
//! point between participants.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

use crate::address::Address;
use crate::compact::fixups::{FixupTable, MoveCallback};
use crate::heap::{ArenaId, ArenaKind, MovingHeap, PageId, PageInfo};
use crate::metrics::{CompactionMetrics, CompactionStats};
use crate::tracing::PassId;

#[cfg(feature = "tracing")]
use crate::compact::tracing::{
    log_cycle_decision, log_cycle_refused, log_free_list_sample, log_pass_stats,
};
#[cfg(feature = "tracing")]
use crate::tracing::internal::{trace_cycle_check, trace_pass_teardown};

/// Number of cycles that must pass between two compactions.
pub const DEFAULT_INTERVAL_THRESHOLD: usize = 10;

/// Free-list residency, in bytes, that must be exceeded before compacting.
pub const DEFAULT_FREE_LIST_THRESHOLD: usize = 512 * 1024;

/// Parameters controlling when compaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Compact only after more than this many cycles since the last pass.
    pub interval_threshold: usize,
    /// Compact only when the sampled free-list size exceeds this.
    pub free_list_threshold: usize,
    /// Also compact vector backing store arenas, not just hash tables.
    pub compact_vector_backing: bool,
    /// Compact on every eligible cycle, ignoring both thresholds.
    pub stress: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval_threshold: DEFAULT_INTERVAL_THRESHOLD,
            free_list_threshold: DEFAULT_FREE_LIST_THRESHOLD,
            compact_vector_backing: true,
            stress: false,
        }
    }
}

/// Feature switch consulted at the start of every cycle.
pub type EnabledCondition = fn() -> bool;

/// The default feature switch: compaction is enabled.
#[must_use]
pub const fn default_enabled_condition() -> bool {
    true
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum CompactionPhase {
    /// No pass is running and no fixup table exists.
    Idle = 0,
    /// A cycle start is being evaluated.
    Deciding = 1,
    /// A pass is running.
    Compacting = 2,
}

impl CompactionPhase {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    fn from_usize(v: usize) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::Deciding),
            2 => Some(Self::Compacting),
            _ => None,
        }
    }
}

/// What kind of collection a cycle performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Precise collection, no heap pointers on any stack.
    Precise,
    /// Collection during idle time, no heap pointers on any stack.
    Idle,
    /// Collection scanning stacks conservatively.
    Conservative,
    /// Collection forced by the embedder.
    Forced,
}

impl CycleKind {
    /// Only cycles that guarantee no stack references into the heap may
    /// move objects.
    #[must_use]
    pub const fn allows_compaction(self) -> bool {
        matches!(self, Self::Precise | Self::Idle)
    }
}

/// Why a collection cycle was started. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcReason {
    /// Idle-time collection.
    Idle,
    /// Precise collection at a safe point.
    Precise,
    /// Conservative collection.
    Conservative,
    /// Explicitly requested.
    Forced,
    /// Allocation pressure.
    MemoryPressure,
    /// Navigating away from a page.
    PageNavigation,
    /// Requested by a test.
    Testing,
}

impl GcReason {
    /// Human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IdleGC",
            Self::Precise => "PreciseGC",
            Self::Conservative => "ConservativeGC",
            Self::Forced => "ForcedGC",
            Self::MemoryPressure => "MemoryPressureGC",
            Self::PageNavigation => "PageNavigationGC",
            Self::Testing => "TestingGC",
        }
    }
}

/// An execution context (typically a heap-owning thread) taking part in a
/// collection cycle.
pub trait Participant {
    /// Returns `true` if the participant's stack may hold heap pointers and
    /// must be scanned conservatively.
    fn needs_conservative_stack_scan(&self) -> bool;
}

impl<T: Participant + ?Sized> Participant for &T {
    fn needs_conservative_stack_scan(&self) -> bool {
        (**self).needs_conservative_stack_scan()
    }
}

/// Decides when to compact and owns the per-pass [`FixupTable`].
///
/// One coordinator is created per heap manager and shared by reference with
/// every participant.
///
/// # Example
///
/// ```
/// use heap_compact::heap::{ArenaId, ArenaKind, MovingHeap, PagedHeap};
/// use heap_compact::{CompactionConfig, CompactionCoordinator, CycleKind, GcReason, Participant};
///
/// struct Mutator;
/// impl Participant for Mutator {
///     fn needs_conservative_stack_scan(&self) -> bool {
///         false
///     }
/// }
///
/// let coordinator = CompactionCoordinator::new(CompactionConfig {
///     stress: true,
///     ..CompactionConfig::default()
/// });
/// assert!(coordinator.on_cycle_start(&[Mutator], CycleKind::Precise, GcReason::Testing));
///
/// let mut heap = PagedHeap::new();
/// let roots = heap.add_page(ArenaId(0), ArenaKind::Normal);
/// let tables = heap.add_page(ArenaId(1), ArenaKind::HashTable);
/// let slot = heap.allocate(roots, 8).unwrap();
/// let table = heap.allocate(tables, 32).unwrap();
/// heap.write_slot(slot, table);
///
/// coordinator.add_compactable_arena(ArenaKind::HashTable, heap.pages_in(ArenaId(1)));
/// coordinator.register_slot(&heap, slot);
///
/// let fresh = heap.add_page(ArenaId(1), ArenaKind::HashTable);
/// let moved = heap.relocate(table, fresh).unwrap();
/// coordinator.notify_object_moved(&mut heap, table, moved);
/// assert_eq!(heap.read_slot(slot), moved);
///
/// coordinator.on_participant_finished(&Mutator);
/// assert!(!coordinator.is_compacting());
/// ```
pub struct CompactionCoordinator {
    phase: AtomicUsize,
    config: Mutex<CompactionConfig>,
    enabled: Mutex<EnabledCondition>,
    cycles_since_last_compaction: AtomicUsize,
    participants: CachePadded<AtomicUsize>,
    free_list_bytes: AtomicUsize,
    freed_pages: AtomicUsize,
    freed_bytes: AtomicUsize,
    fixups: Mutex<Option<FixupTable>>,
    pass_start: Mutex<Option<Instant>>,
    passes: AtomicU64,
    last_stats: Mutex<Option<CompactionStats>>,
    metrics: CompactionMetrics,
}

impl Default for CompactionCoordinator {
    fn default() -> Self {
        Self::new(CompactionConfig::default())
    }
}

impl CompactionCoordinator {
    /// Create an idle coordinator.
    #[must_use]
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            phase: AtomicUsize::new(CompactionPhase::Idle as usize),
            config: Mutex::new(config),
            enabled: Mutex::new(default_enabled_condition),
            cycles_since_last_compaction: AtomicUsize::new(0),
            participants: CachePadded::new(AtomicUsize::new(0)),
            free_list_bytes: AtomicUsize::new(0),
            freed_pages: AtomicUsize::new(0),
            freed_bytes: AtomicUsize::new(0),
            fixups: Mutex::new(None),
            pass_start: Mutex::new(None),
            passes: AtomicU64::new(0),
            last_stats: Mutex::new(None),
            metrics: CompactionMetrics::new(),
        }
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> CompactionConfig {
        *self.config.lock()
    }

    /// Replace the configuration. Takes effect at the next cycle start.
    pub fn set_config(&self, config: CompactionConfig) {
        *self.config.lock() = config;
    }

    /// Install the feature switch consulted at every cycle start.
    pub fn set_enabled_condition(&self, condition: EnabledCondition) {
        *self.enabled.lock() = condition;
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> CompactionPhase {
        CompactionPhase::from_usize(self.phase.load(Ordering::Acquire))
            .unwrap_or(CompactionPhase::Idle)
    }

    fn set_phase(&self, phase: CompactionPhase) {
        self.phase.store(phase as usize, Ordering::Release);
    }

    /// Returns `true` while a compaction pass is running.
    #[must_use]
    pub fn is_compacting(&self) -> bool {
        self.phase() == CompactionPhase::Compacting
    }

    /// Returns `true` if pages of `kind` are compacted.
    #[must_use]
    pub fn is_compacting_arena(&self, kind: ArenaKind) -> bool {
        match kind {
            ArenaKind::HashTable => true,
            ArenaKind::Vector | ArenaKind::InlineVector => self.config().compact_vector_backing,
            ArenaKind::Normal | ArenaKind::LargeObject => false,
        }
    }

    /// Cycles started since the last compaction pass.
    #[must_use]
    pub fn cycles_since_last_compaction(&self) -> usize {
        self.cycles_since_last_compaction.load(Ordering::Relaxed)
    }

    /// Participants that have not yet finished the running pass.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.load(Ordering::Acquire)
    }

    /// Latest free-list residency sample.
    #[must_use]
    pub fn free_list_bytes(&self) -> usize {
        self.free_list_bytes.load(Ordering::Relaxed)
    }

    /// Returns `true` if a fixup table currently exists.
    #[must_use]
    pub fn has_fixup_table(&self) -> bool {
        self.fixups.lock().is_some()
    }

    /// Number of objects tracked by the running pass.
    #[must_use]
    pub fn tracked_objects(&self) -> usize {
        self.fixups.lock().as_ref().map_or(0, FixupTable::len)
    }

    /// Statistics of the most recently finished pass.
    #[must_use]
    pub fn last_compaction_stats(&self) -> Option<CompactionStats> {
        *self.last_stats.lock()
    }

    /// Cumulative statistics across passes.
    #[must_use]
    pub const fn metrics(&self) -> &CompactionMetrics {
        &self.metrics
    }

    // ========================================================================
    // Cycle decision
    // ========================================================================

    /// Decide whether the cycle starting now also compacts.
    ///
    /// Compaction requires the feature switch to be on, a cycle kind that
    /// rules out stack references into the heap, no participant needing a
    /// conservative stack scan, and (unless in stress mode) both more than
    /// `interval_threshold` cycles since the last pass and more than
    /// `free_list_threshold` bytes of sampled free-list residency.
    ///
    /// Returns `true` if a pass was started.
    pub fn on_cycle_start<P: Participant>(
        &self,
        participants: &[P],
        kind: CycleKind,
        reason: GcReason,
    ) -> bool {
        let enabled = *self.enabled.lock();
        if !enabled() {
            return false;
        }
        debug_assert!(
            !self.is_compacting(),
            "cycle started while a compaction pass is running"
        );
        if self.is_compacting() {
            return false;
        }

        self.set_phase(CompactionPhase::Deciding);
        let cycles = self
            .cycles_since_last_compaction
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        #[cfg(feature = "tracing")]
        let _span = trace_cycle_check(reason.as_str(), cycles);
        #[cfg(not(feature = "tracing"))]
        let _ = reason;

        // A stack reference into a backing store that is about to move
        // cannot be found and fixed up.
        let refusal = if !kind.allows_compaction() {
            Some("cycle kind")
        } else if participants.is_empty() {
            Some("no participants")
        } else if participants
            .iter()
            .any(|p| p.needs_conservative_stack_scan())
        {
            Some("conservative stack scan")
        } else {
            None
        };
        if let Some(cause) = refusal {
            #[cfg(feature = "tracing")]
            log_cycle_refused(reason.as_str(), cause);
            #[cfg(not(feature = "tracing"))]
            let _ = cause;
            self.set_phase(CompactionPhase::Idle);
            return false;
        }

        let config = self.config();
        let free_list_bytes = self.free_list_bytes();
        let compact = config.stress
            || (cycles > config.interval_threshold
                && free_list_bytes > config.free_list_threshold);

        #[cfg(feature = "tracing")]
        log_cycle_decision(reason.as_str(), cycles, free_list_bytes, compact);

        if !compact {
            self.set_phase(CompactionPhase::Idle);
            return false;
        }

        self.participants
            .store(participants.len(), Ordering::Release);
        *self.fixups.lock() = None;
        *self.pass_start.lock() = None;
        self.freed_pages.store(0, Ordering::Relaxed);
        self.freed_bytes.store(0, Ordering::Relaxed);
        self.cycles_since_last_compaction
            .store(0, Ordering::Relaxed);
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.set_phase(CompactionPhase::Compacting);
        true
    }

    /// Record the free-list residency measured after this cycle's decision.
    ///
    /// While compacting the sample is discarded and the stored value reset,
    /// since compaction is about to change it.
    pub fn sample_free_list_bytes(&self, bytes: usize) {
        let compacting = self.is_compacting();
        #[cfg(feature = "tracing")]
        log_free_list_sample(bytes, compacting);
        let sample = if compacting { 0 } else { bytes };
        self.free_list_bytes.store(sample, Ordering::Relaxed);
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// The phase is checked under the table lock, so a registration racing
    /// with teardown either lands in the pass's table or is dropped.
    fn with_fixups<R>(&self, f: impl FnOnce(&mut FixupTable) -> R) -> Option<R> {
        let mut guard = self.fixups.lock();
        if !self.is_compacting() {
            return None;
        }
        Some(f(guard.get_or_insert_with(FixupTable::new)))
    }

    /// Add `pages` to the running pass if arenas of `kind` are compacted.
    pub fn add_compactable_arena(&self, kind: ArenaKind, pages: impl IntoIterator<Item = PageId>) {
        if !self.is_compacting_arena(kind) {
            return;
        }
        self.with_fixups(|fixups| {
            for page in pages {
                fixups.add_compactable_page(page);
            }
        });
    }

    /// Add a single page to the running pass if its arena is compacted.
    pub fn add_compactable_page(&self, page: &PageInfo) {
        if !self.is_compacting_arena(page.kind) {
            return;
        }
        self.with_fixups(|fixups| fixups.add_compactable_page(page.id));
    }

    /// Register `slot` as referencing a movable object.
    ///
    /// Outside a pass this does nothing. See [`FixupTable::register_slot`].
    pub fn register_slot(&self, heap: &dyn MovingHeap, slot: Address) {
        self.with_fixups(|fixups| fixups.register_slot(heap, slot));
    }

    /// Register a hook to run after `object` has moved.
    ///
    /// Outside a pass this does nothing and the callback is dropped.
    pub fn register_move_callback(&self, object: Address, callback: MoveCallback) {
        self.with_fixups(|fixups| fixups.register_move_callback(object, callback));
    }

    /// Register a slot outside the compactable pages referencing a movable
    /// object.
    ///
    /// Outside a pass this does nothing.
    pub fn register_cross_region_relocation(&self, heap: &dyn MovingHeap, slot: Address) {
        self.with_fixups(|fixups| fixups.register_cross_region_relocation(heap, slot));
    }

    // ========================================================================
    // Relocation
    // ========================================================================

    /// The object at `from` now lives at `to`; patch the slot referencing it.
    pub fn notify_object_moved(&self, heap: &mut dyn MovingHeap, from: Address, to: Address) {
        debug_assert!(self.is_compacting(), "object moved outside a compaction pass");
        let mut guard = self.fixups.lock();
        debug_assert!(guard.is_some(), "object moved before any registration");
        if let Some(fixups) = guard.as_mut() {
            fixups.notify_object_moved(heap, from, to);
        }
    }

    /// `arena` has been compacted, releasing `freed_pages` pages holding
    /// `freed_bytes` bytes. Patches the cross-region slots into `arena`.
    pub fn on_arena_compaction_finished(
        &self,
        heap: &mut dyn MovingHeap,
        arena: ArenaId,
        freed_pages: usize,
        freed_bytes: usize,
    ) {
        if self
            .with_fixups(|fixups| fixups.fixup_cross_region_relocations(heap, arena))
            .is_none()
        {
            return;
        }
        self.freed_pages.fetch_add(freed_pages, Ordering::Relaxed);
        self.freed_bytes.fetch_add(freed_bytes, Ordering::Relaxed);
    }

    // ========================================================================
    // Pass lifetime
    // ========================================================================

    /// `participant` starts compacting its arenas.
    ///
    /// The first call of a pass starts the pass timer.
    pub fn on_pass_start<P: Participant + ?Sized>(&self, _participant: &P) {
        if !self.is_compacting() {
            return;
        }
        self.pass_start.lock().get_or_insert_with(Instant::now);
    }

    /// `participant` has finished compacting.
    ///
    /// The last participant to finish releases the fixup table, ends the pass
    /// and publishes its statistics.
    pub fn on_participant_finished<P: Participant + ?Sized>(&self, _participant: &P) {
        if !self.is_compacting() {
            return;
        }
        let previous = self
            .participants
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        debug_assert!(previous.is_ok(), "more participants finished than started");
        if previous == Ok(1) {
            self.finish_pass();
        }
    }

    fn finish_pass(&self) {
        let pass_id = PassId(self.passes.load(Ordering::Relaxed));
        #[cfg(feature = "tracing")]
        let _span = trace_pass_teardown(pass_id);

        // Leave `Compacting` under the table lock; no table outlives the pass.
        let fixups = {
            let mut guard = self.fixups.lock();
            self.set_phase(CompactionPhase::Idle);
            guard.take()
        };
        let duration = self
            .pass_start
            .lock()
            .take()
            .map(|start| start.elapsed())
            .unwrap_or_default();
        let stats = CompactionStats {
            pass_id,
            freed_pages: self.freed_pages.load(Ordering::Relaxed),
            freed_bytes: self.freed_bytes.load(Ordering::Relaxed),
            objects_relocated: fixups.as_ref().map_or(0, FixupTable::objects_relocated),
            duration,
        };
        drop(fixups);

        #[cfg(feature = "tracing")]
        log_pass_stats(&stats);
        self.metrics.record(&stats);
        *self.last_stats.lock() = Some(stats);
    }
}

impl std::fmt::Debug for CompactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionCoordinator")
            .field("phase", &self.phase())
            .field("config", &self.config())
            .field("cycles_since_last_compaction", &self.cycles_since_last_compaction())
            .field("participants", &self.participant_count())
            .field("free_list_bytes", &self.free_list_bytes())
            .finish_non_exhaustive()
    }
}
