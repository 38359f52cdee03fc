//! Metrics definitions for mirror pipeline monitoring.
//!
//! The `pipeline_id` label is attached globally by the exporter.

/// Label for the sink name in metrics.
pub const SINK_LABEL: &str = "sink";

// Flush metrics

/// Counter for records newly written by flushes.
pub const MIRROR_RECORDS_FLUSHED_TOTAL: &str = "mirror_records_flushed_total";

/// Counter for records a flush found already present in the sink.
pub const MIRROR_DUPLICATES_TOLERATED_TOTAL: &str = "mirror_duplicates_tolerated_total";

/// Counter for failed flush attempts.
pub const MIRROR_FLUSH_FAILURES_TOTAL: &str = "mirror_flush_failures_total";

/// Histogram for the duration of a successful flush, sink write and checkpoint save included.
pub const MIRROR_FLUSH_DURATION_SECONDS: &str = "mirror_flush_duration_seconds";

/// Counter for checkpoint saves.
pub const MIRROR_CHECKPOINT_ADVANCES_TOTAL: &str = "mirror_checkpoint_advances_total";

/// Gauge for anonymized records waiting to be flushed.
pub const MIRROR_PENDING_ITEMS: &str = "mirror_pending_items";

// Feed metrics

/// Counter for insert events received from the source feed.
pub const MIRROR_EVENTS_RECEIVED_TOTAL: &str = "mirror_events_received_total";

// Catch-up metrics

/// Counter for records upserted by the catch-up sync.
pub const MIRROR_RECORDS_UPSERTED_TOTAL: &str = "mirror_records_upserted_total";
