//! Compaction metrics and statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::tracing::PassId;

/// Statistics from the most recent compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Sequence number of the pass, starting at 1.
    pub pass_id: PassId,
    /// Pages released by the compacted arenas.
    pub freed_pages: usize,
    /// Bytes released by the compacted arenas.
    pub freed_bytes: usize,
    /// Slots successfully redirected to a moved object.
    pub objects_relocated: usize,
    /// Time from the first participant starting the pass to teardown.
    pub duration: Duration,
}

impl Default for CompactionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactionStats {
    /// Create a new `CompactionStats` with all fields set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pass_id: PassId(0),
            freed_pages: 0,
            freed_bytes: 0,
            objects_relocated: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Cumulative compaction statistics across passes.
///
/// # Example
///
/// ```
/// use heap_compact::{CompactionConfig, CompactionCoordinator};
///
/// let coordinator = CompactionCoordinator::new(CompactionConfig::default());
/// let metrics = coordinator.metrics();
/// assert_eq!(metrics.total_passes(), 0);
/// assert_eq!(metrics.total_freed_bytes(), 0);
/// ```
#[derive(Debug)]
pub struct CompactionMetrics {
    passes: AtomicUsize,
    freed_pages: AtomicUsize,
    freed_bytes: AtomicUsize,
    objects_relocated: AtomicUsize,
    compaction_ns: AtomicU64,
}

impl Default for CompactionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactionMetrics {
    /// Create a new `CompactionMetrics` with all counters initialized to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            passes: AtomicUsize::new(0),
            freed_pages: AtomicUsize::new(0),
            freed_bytes: AtomicUsize::new(0),
            objects_relocated: AtomicUsize::new(0),
            compaction_ns: AtomicU64::new(0),
        }
    }

    /// Returns the number of completed compaction passes.
    #[inline]
    #[must_use]
    pub fn total_passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }

    /// Returns the total number of pages freed by compaction.
    #[inline]
    #[must_use]
    pub fn total_freed_pages(&self) -> usize {
        self.freed_pages.load(Ordering::Relaxed)
    }

    /// Returns the total number of bytes freed by compaction.
    #[inline]
    #[must_use]
    pub fn total_freed_bytes(&self) -> usize {
        self.freed_bytes.load(Ordering::Relaxed)
    }

    /// Returns the total number of slots redirected to moved objects.
    #[inline]
    #[must_use]
    pub fn total_objects_relocated(&self) -> usize {
        self.objects_relocated.load(Ordering::Relaxed)
    }

    /// Returns the total time spent in compaction passes.
    #[inline]
    #[must_use]
    pub fn total_compaction_time(&self) -> Duration {
        Duration::from_nanos(self.compaction_ns.load(Ordering::Relaxed))
    }

    pub(crate) fn record(&self, stats: &CompactionStats) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.freed_pages
            .fetch_add(stats.freed_pages, Ordering::Relaxed);
        self.freed_bytes
            .fetch_add(stats.freed_bytes, Ordering::Relaxed);
        self.objects_relocated
            .fetch_add(stats.objects_relocated, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        self.compaction_ns
            .fetch_add(stats.duration.as_nanos() as u64, Ordering::Relaxed);
    }
}
