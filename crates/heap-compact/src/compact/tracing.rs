//! Compaction-level tracing events.

use crate::address::Address;

/// Log the outcome of a compaction decision.
pub fn log_cycle_decision(reason: &str, cycles: usize, free_list_bytes: usize, compact: bool) {
    tracing::debug!(
        reason = reason,
        cycles = cycles,
        free_list_bytes = free_list_bytes,
        compact = compact,
        "compaction_decision"
    );
}

/// Log why a cycle was refused compaction before the thresholds were checked.
pub fn log_cycle_refused(reason: &str, cause: &str) {
    tracing::debug!(reason = reason, cause = cause, "compaction_refused");
}

/// Log a slot whose location was redirected to the relocated containing object.
pub fn log_redirected_slot(slot: Address, relocated: Address) {
    tracing::trace!(slot = %slot, relocated = %relocated, "redirected_slot");
}

/// Log a slot left alone because it no longer references the moved object.
pub fn log_stale_slot(slot: Address, contents: Address, from: Address, to: Address) {
    tracing::trace!(
        slot = %slot,
        contents = %contents,
        from = %from,
        to = %to,
        "no_relocation"
    );
}

/// Log an interior slot mapped to its relocated location.
pub fn log_interior_fixup(interior: Address, relocated: Address) {
    tracing::trace!(interior = %interior, relocated = %relocated, "interior_fixup");
}

/// Log a newly recorded interior address.
pub fn log_interior_mapping(interior: Address) {
    tracing::trace!(interior = %interior, "interior");
}

/// Log a free-list residency sample.
pub fn log_free_list_sample(bytes: usize, ignored: bool) {
    tracing::trace!(bytes = bytes, ignored = ignored, "free_list_sample");
}

/// Log the statistics of a finished compaction pass.
pub fn log_pass_stats(stats: &crate::metrics::CompactionStats) {
    tracing::debug!(
        pass_id = stats.pass_id.0,
        freed_pages = stats.freed_pages,
        freed_bytes = stats.freed_bytes,
        objects_relocated = stats.objects_relocated,
        duration_us = u64::try_from(stats.duration.as_micros()).unwrap_or(u64::MAX),
        "compaction_stats"
    );
}
