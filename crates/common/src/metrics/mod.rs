//! Metrics and observability utilities
//!
//! Prometheus-style metrics with standardized naming. Nothing is exported
//! unless the binary installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all StudySpark metrics
pub const METRICS_PREFIX: &str = "studyspark";

/// Buckets for model call latency (uploads and generations are slow)
pub const MODEL_LATENCY_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    20.00,  // 20s
    30.00,  // 30s
    60.00,  // 1m
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Model metrics
    describe_counter!(
        format!("{}_model_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total generative model API calls"
    );

    describe_histogram!(
        format!("{}_model_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Generative model call latency in seconds"
    );

    describe_counter!(
        format!("{}_model_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Model calls retried after a transient error"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_ingestions_total", METRICS_PREFIX),
        Unit::Count,
        "Ingestion trigger invocations by outcome"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Time from finalize event to summary write"
    );

    // Enrichment metrics
    describe_counter!(
        format!("{}_enrichments_total", METRICS_PREFIX),
        Unit::Count,
        "Feature generations by feature and status"
    );

    describe_histogram!(
        format!("{}_enrichment_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Feature generation latency in seconds"
    );

    // Janitor metrics
    describe_counter!(
        format!("{}_janitor_blobs_deleted_total", METRICS_PREFIX),
        Unit::Count,
        "Expired blobs removed by the janitor"
    );

    describe_counter!(
        format!("{}_janitor_delete_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Expired blobs the janitor failed to remove"
    );

    tracing::info!("Metrics registered");
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Helper to record a model call
pub fn record_model_call(operation: &str, model: &str, duration_secs: f64, success: bool) {
    counter!(
        format!("{}_model_requests_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "model" => model.to_string(),
        "status" => status_label(success)
    )
    .increment(1);

    histogram!(
        format!("{}_model_request_duration_seconds", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a retried model call
pub fn record_retry(operation: &str) {
    counter!(
        format!("{}_model_retries_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Helper to record an ingestion outcome
pub fn record_ingestion(outcome: &str, mode: &str, duration_secs: f64) {
    counter!(
        format!("{}_ingestions_total", METRICS_PREFIX),
        "outcome" => outcome.to_string(),
        "mode" => mode.to_string()
    )
    .increment(1);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record a single feature generation
pub fn record_enrichment(feature: &str, success: bool, duration_secs: f64) {
    counter!(
        format!("{}_enrichments_total", METRICS_PREFIX),
        "feature" => feature.to_string(),
        "status" => status_label(success)
    )
    .increment(1);

    histogram!(
        format!("{}_enrichment_duration_seconds", METRICS_PREFIX),
        "feature" => feature.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a janitor sweep
pub fn record_sweep(deleted: usize, failed: usize) {
    counter!(format!("{}_janitor_blobs_deleted_total", METRICS_PREFIX)).increment(deleted as u64);
    counter!(format!("{}_janitor_delete_failures_total", METRICS_PREFIX)).increment(failed as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_latency_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in MODEL_LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: calls must be no-ops.
        record_model_call("generate", "mock", 0.01, true);
        record_ingestion("completed", "detailed", 1.5);
        record_enrichment("quiz", false, 0.2);
        record_sweep(2, 0);
    }
}
