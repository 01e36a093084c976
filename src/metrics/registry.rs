// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, HistogramVec, GaugeVec, Opts, Registry, TextEncoder, Encoder,
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_gauge_vec_with_registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // REQUEST METRICS
    // ============================================================================

    /// Total number of API requests
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("requests_total", "Total number of API requests"),
        &["method", "endpoint", "status_code"],
        REGISTRY
    ).unwrap();

    /// Request duration histogram
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("request_duration_seconds", "Request duration in seconds")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint", "status_code"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Cache operations per tier
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("cache_operations_total", "Total cache operations"),
        // tier: fast, similarity, persistent; rejected stores use tier "store" with the reject reason
        // (capacity, owner_mismatch, key_mismatch, invalid, sealing) as the operation
        &["tier", "operation"], // operation: hit, miss, store, promote, integrity_failure
        REGISTRY
    ).unwrap();

    /// Current cache entries per tier
    pub static ref CACHE_ENTRIES: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("cache_entries_current", "Current number of cache entries"),
        &["tier"],
        REGISTRY
    ).unwrap();

    /// Template cache operations
    pub static ref TEMPLATE_CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("template_cache_operations_total", "Total template cache operations"),
        &["operation"], // operation: hit, miss, compile, evict
        REGISTRY
    ).unwrap();

    // ============================================================================
    // ADMISSION METRICS
    // ============================================================================

    /// Rate limiter decisions
    pub static ref ADMISSIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("admissions_total", "Rate limiter and quota decisions"),
        &["decision"], // decision: admitted, rate_limited, quota_exceeded, rejected
        REGISTRY
    ).unwrap();

    /// Reserved in-flight work
    pub static ref IN_FLIGHT: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("in_flight_current", "Admitted requests not yet finished"),
        &["scope"], // scope: admitted, generation
        REGISTRY
    ).unwrap();

    // ============================================================================
    // GENERATION METRICS
    // ============================================================================

    /// Generation pipeline calls
    pub static ref GENERATION_CALLS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("generation_calls_total", "Total generation pipeline calls"),
        &["status"], // status: success, failure, timeout
        REGISTRY
    ).unwrap();

    /// Generation call duration
    pub static ref GENERATION_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("generation_duration_seconds", "Generation pipeline call duration")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["status"],
        REGISTRY
    ).unwrap();

    /// Batch item outcomes
    pub static ref BATCH_ITEMS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("batch_items_total", "Batch item outcomes"),
        // outcome: generated, cached, or the failure kind (quota_exceeded, timeout, generation_failed,
        // cancelled, invalid_request, template_error, internal_error)
        &["outcome"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // AUDIT METRICS
    // ============================================================================

    /// Audit events appended
    pub static ref AUDIT_EVENTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("audit_events_total", "Total audit events recorded"),
        &["event_type"],
        REGISTRY
    ).unwrap();

    /// Audit segment rotations
    pub static ref AUDIT_ROTATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("audit_rotations_total", "Total audit segment rotations"),
        &["reason"], // reason: size, age, manual
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        CACHE_OPERATIONS.with_label_values(&["fast", "hit"]).inc();
        ADMISSIONS.with_label_values(&["admitted"]).inc();
        GENERATION_CALLS.with_label_values(&["success"]).inc();
        AUDIT_EVENTS.with_label_values(&["admit"]).inc();

        let metrics = gather_metrics();
        assert!(metrics.contains("cache_operations_total"));
        assert!(metrics.contains("admissions_total"));
        assert!(metrics.contains("generation_calls_total"));
        assert!(metrics.contains("audit_events_total"));
    }
}
