//! Metrics for the resolution and reconciliation jobs
//!
//! Counters go through the `metrics` facade with standardized naming.
//! The batch binaries install no exporter, so these are no-ops unless a
//! recorder is registered by the embedding process.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all SkyMerge metrics
pub const METRICS_PREFIX: &str = "skymerge";

/// Register all metric descriptions
pub fn register_metrics() {
    // Identity resolution
    describe_counter!(
        format!("{}_targets_resolved_total", METRICS_PREFIX),
        Unit::Count,
        "Candidates resolved at ingestion, by outcome"
    );

    // Reconciliation
    describe_counter!(
        format!("{}_merge_groups_total", METRICS_PREFIX),
        Unit::Count,
        "Merge groups processed, by status"
    );

    describe_counter!(
        format!("{}_datums_moved_total", METRICS_PREFIX),
        Unit::Count,
        "Time-series points handled during merges, by action"
    );

    describe_counter!(
        format!("{}_targets_deleted_total", METRICS_PREFIX),
        Unit::Count,
        "Absorbed target shells deleted"
    );

    describe_histogram!(
        format!("{}_merge_group_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Time to plan and commit one merge group"
    );

    tracing::debug!("Metrics registered");
}

/// Record one identity resolution
pub fn record_resolution(outcome: &str) {
    counter!(
        format!("{}_targets_resolved_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record datum handling counts for one merge group
pub fn record_datums(action: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        format!("{}_datums_moved_total", METRICS_PREFIX),
        "action" => action.to_string()
    )
    .increment(count as u64);
}

/// Record deleted shells
pub fn record_deleted(count: usize) {
    counter!(format!("{}_targets_deleted_total", METRICS_PREFIX)).increment(count as u64);
}

/// Helper to time one merge group and record its final status
pub struct GroupMetrics {
    start: Instant,
}

impl GroupMetrics {
    /// Start tracking a group
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record group completion
    pub fn finish(self, status: &str) {
        counter!(
            format!("{}_merge_groups_total", METRICS_PREFIX),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(format!("{}_merge_group_duration_seconds", METRICS_PREFIX))
            .record(self.start.elapsed().as_secs_f64());
    }
}
