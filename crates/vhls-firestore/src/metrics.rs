//! Metric names and recording helpers for Firestore operations.

use metrics::{counter, histogram};

pub const REQUESTS_TOTAL: &str = "firestore_requests_total";
pub const RETRIES_TOTAL: &str = "firestore_retries_total";
pub const LATENCY_SECONDS: &str = "firestore_request_latency_seconds";

/// Record a completed Firestore request.
///
/// `status` is the HTTP status code of the final response (or the mapped
/// status of the final error).
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt for a Firestore operation.
pub fn record_retry(operation: &str) {
    counter!(
        RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}
