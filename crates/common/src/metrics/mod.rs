//! Metrics and observability utilities
//!
//! Prometheus metric descriptions and small recording helpers shared by the
//! services and the gateway.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

use crate::errors::QuotaMetric;

/// Metrics prefix for all FieldForm metrics
pub const METRICS_PREFIX: &str = "fieldform";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Form lifecycle
    describe_counter!(
        format!("{}_forms_created_total", METRICS_PREFIX),
        Unit::Count,
        "Forms created, by storage class"
    );

    describe_counter!(
        format!("{}_forms_deleted_total", METRICS_PREFIX),
        Unit::Count,
        "Forms soft-deleted"
    );

    describe_counter!(
        format!("{}_quota_rejections_total", METRICS_PREFIX),
        Unit::Count,
        "Requests rejected by a plan quota, by metric"
    );

    // Responses
    describe_counter!(
        format!("{}_responses_collected_total", METRICS_PREFIX),
        Unit::Count,
        "Responses stored in the shared store"
    );

    // Security
    describe_counter!(
        format!("{}_plugin_auth_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Plugin requests rejected for a missing or wrong token"
    );

    describe_counter!(
        format!("{}_credential_decrypt_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Stored tenant credentials that failed to decrypt"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_form_created(storage_class: &str) {
    counter!(
        format!("{}_forms_created_total", METRICS_PREFIX),
        "storage_class" => storage_class.to_string()
    )
    .increment(1);
}

pub fn record_form_deleted() {
    counter!(format!("{}_forms_deleted_total", METRICS_PREFIX)).increment(1);
}

pub fn record_quota_rejection(metric: QuotaMetric) {
    counter!(
        format!("{}_quota_rejections_total", METRICS_PREFIX),
        "metric" => metric.to_string()
    )
    .increment(1);
}

pub fn record_response_collected() {
    counter!(format!("{}_responses_collected_total", METRICS_PREFIX)).increment(1);
}

pub fn record_plugin_auth_failure() {
    counter!(format!("{}_plugin_auth_failures_total", METRICS_PREFIX)).increment(1);
}

pub fn record_decrypt_failure() {
    counter!(format!("{}_credential_decrypt_failures_total", METRICS_PREFIX)).increment(1);
}
