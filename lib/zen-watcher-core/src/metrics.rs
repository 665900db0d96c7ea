//! Metric names and one-time `describe_*` registration.
//!
//! The core only calls the `metrics` facade; wiring an exporter (Prometheus
//! or otherwise) is left to the binary that embeds this crate.

pub const EVENTS_TOTAL: &str = "events_total";
pub const OBSERVATIONS_CREATED: &str = "observations_created";
pub const OBSERVATIONS_FILTERED: &str = "observations_filtered";
pub const OBSERVATIONS_DEDUPED: &str = "observations_deduped";
pub const OBSERVATIONS_CREATE_ERRORS: &str = "observations_create_errors";

pub const GAUGE_FILTER_PASS_RATE: &str = "zen_watcher_filter_pass_rate";
pub const GAUGE_DEDUP_EFFECTIVENESS: &str = "zen_watcher_dedup_effectiveness";
pub const GAUGE_LOW_SEVERITY_PERCENT: &str = "zen_watcher_low_severity_percent";
pub const GAUGE_EVENTS_PER_MINUTE: &str = "zen_watcher_events_per_minute";
pub const GAUGE_EVENTS_PER_HOUR: &str = "zen_watcher_events_per_hour";
pub const GAUGE_SEVERITY_DISTRIBUTION: &str = "zen_watcher_severity_distribution";

/// Register descriptions for every metric this core emits. Call once at
/// startup, before any adapter runs.
pub fn describe_all() {
    metrics::describe_counter!(
        EVENTS_TOTAL,
        "Successful writes, labeled by source/category/severity/eventType/namespace/kind/strategy"
    );
    metrics::describe_counter!(OBSERVATIONS_CREATED, "Observations created, labeled by source");
    metrics::describe_counter!(
        OBSERVATIONS_FILTERED,
        "Events rejected by the filter, labeled by source/reason"
    );
    metrics::describe_counter!(OBSERVATIONS_DEDUPED, "Events rejected as duplicates");
    metrics::describe_counter!(
        OBSERVATIONS_CREATE_ERRORS,
        "Write failures, labeled by source/error_type (includes not_allowed)"
    );
    metrics::describe_gauge!(GAUGE_FILTER_PASS_RATE, "Share of attempts that passed the filter, per source");
    metrics::describe_gauge!(
        GAUGE_DEDUP_EFFECTIVENESS,
        "Share of attempts that were duplicates, per source"
    );
    metrics::describe_gauge!(
        GAUGE_LOW_SEVERITY_PERCENT,
        "Share of attempts with low/info severity, per source"
    );
    metrics::describe_gauge!(GAUGE_EVENTS_PER_MINUTE, "Created-event rate per minute, per source");
    metrics::describe_gauge!(GAUGE_EVENTS_PER_HOUR, "Created-event rate per hour, per source");
    metrics::describe_gauge!(
        GAUGE_SEVERITY_DISTRIBUTION,
        "Share of created events per severity, labeled by source/severity"
    );
}
