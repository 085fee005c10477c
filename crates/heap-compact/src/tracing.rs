//! Compaction tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans for compaction decisions and pass teardown.

/// Stable identifier for a compaction pass.
///
/// Pass identifiers are handed out by the coordinator, starting at 1, and
/// correlate the decision, relocation and teardown events of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PassId(pub u64);

/// Span helpers used by the coordinator.
#[cfg(feature = "tracing")]
pub mod internal {
    use super::PassId;
    use tracing::{span, Level};

    /// Create a span around a compaction decision.
    pub fn trace_cycle_check(reason: &str, cycle: usize) -> span::EnteredSpan {
        span!(Level::DEBUG, "compaction_check", reason = reason, cycle = cycle).entered()
    }

    /// Create a span around the teardown of a compaction pass.
    pub fn trace_pass_teardown(pass_id: PassId) -> span::EnteredSpan {
        span!(Level::DEBUG, "compaction_teardown", pass_id = pass_id.0).entered()
    }
}
