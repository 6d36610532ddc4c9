//! Prometheus metrics for sync passes
//!
//! Exposed through `encode_metrics()` for whatever scrapes the host process.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Histogram: pass duration by outcome (seconds)
    pub static ref PASS_DURATION: HistogramVec = register_histogram_vec!(
        "kanban_sync_pass_duration_seconds",
        "Duration of sync passes",
        &["outcome"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to create pass_duration metric");

    /// Counter: executed operations by kind and final status
    pub static ref OPERATIONS: CounterVec = register_counter_vec!(
        "kanban_sync_operations_total",
        "Executed sync operations by kind and status",
        &["kind", "status"]
    )
    .expect("Failed to create operations metric");

    /// Counter: tracker errors by class
    pub static ref API_ERRORS: CounterVec = register_counter_vec!(
        "kanban_sync_api_errors_total",
        "Total tracker API errors by class",
        &["class", "call"]
    )
    .expect("Failed to create api_errors metric");

    /// Counter: conflicts by kind and how they were settled
    pub static ref CONFLICTS: CounterVec = register_counter_vec!(
        "kanban_sync_conflicts_total",
        "Conflicts detected by kind and resolution",
        &["kind", "resolution"]
    )
    .expect("Failed to create conflicts metric");

    /// Gauge: conflicts waiting for a user decision
    pub static ref PENDING_CONFLICTS: Gauge = register_gauge!(
        "kanban_sync_pending_conflicts",
        "Conflicts waiting for a user decision"
    )
    .expect("Failed to create pending_conflicts metric");
}

/// Record a pass duration
pub fn record_pass_duration(outcome: &str, duration_secs: f64) {
    PASS_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Record an executed operation
pub fn record_operation(kind: &str, status: &str) {
    OPERATIONS.with_label_values(&[kind, status]).inc();
}

/// Increment API error counter
pub fn record_api_error(class: &str, call: &str) {
    API_ERRORS.with_label_values(&[class, call]).inc();
}

/// Record a detected conflict; `resolution` is `user`, `automatic` or `pending`
pub fn record_conflict(kind: &str, resolution: &str) {
    CONFLICTS.with_label_values(&[kind, resolution]).inc();
}

/// Set the number of pending conflicts
pub fn set_pending_conflicts(count: usize) {
    PENDING_CONFLICTS.set(count as f64);
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
