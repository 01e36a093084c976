// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    REQUESTS_TOTAL,
    REQUEST_DURATION,
    CACHE_OPERATIONS,
    CACHE_ENTRIES,
    TEMPLATE_CACHE_OPERATIONS,
    ADMISSIONS,
    IN_FLIGHT,
    GENERATION_CALLS,
    GENERATION_DURATION,
    BATCH_ITEMS,
    AUDIT_EVENTS,
    AUDIT_ROTATIONS,
};

/// Helper to record request metrics
pub fn record_request(method: &str, endpoint: &str, status_code: u16, duration_secs: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status_code.to_string()])
        .inc();

    REQUEST_DURATION
        .with_label_values(&[method, endpoint, &status_code.to_string()])
        .observe(duration_secs);
}

/// Helper to record response cache operations
pub fn record_cache_op(tier: &str, operation: &str) {
    CACHE_OPERATIONS.with_label_values(&[tier, operation]).inc();
}

pub fn update_cache_entries(tier: &str, count: usize) {
    CACHE_ENTRIES.with_label_values(&[tier]).set(count as f64);
}

/// Helper to record template cache operations
pub fn record_template_op(operation: &str) {
    TEMPLATE_CACHE_OPERATIONS.with_label_values(&[operation]).inc();
}

/// Helper to record admission decisions
pub fn record_admission(decision: &str) {
    ADMISSIONS.with_label_values(&[decision]).inc();
}

pub fn adjust_in_flight(scope: &str, delta: f64) {
    IN_FLIGHT.with_label_values(&[scope]).add(delta);
}

/// Helper to record generation pipeline calls
pub fn record_generation(status: &str, duration_secs: f64) {
    GENERATION_CALLS.with_label_values(&[status]).inc();
    GENERATION_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

pub fn record_batch_item(outcome: &str) {
    BATCH_ITEMS.with_label_values(&[outcome]).inc();
}

/// Helper to record audit activity
pub fn record_audit_event(event_type: &str) {
    AUDIT_EVENTS.with_label_values(&[event_type]).inc();
}

pub fn record_audit_rotation(reason: &str) {
    AUDIT_ROTATIONS.with_label_values(&[reason]).inc();
}
