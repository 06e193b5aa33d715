//! Engine metrics collection.
//!
//! Provides standardized metrics for monitoring a scanning session:
//! - Cloud request counters by outcome
//! - Detection counters by backend
//! - Time-to-first-detection histogram
//! - Enrichment job counters by outcome
//! - Eviction counters

use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Total completed cloud identification attempts by outcome.
    pub const CLOUD_REQUESTS_TOTAL: &str = "ilens_cloud_requests_total";

    /// Total canonical detections created by backend.
    pub const DETECTIONS_TOTAL: &str = "ilens_detections_total";

    /// Seconds from session start to the first canonical detection.
    pub const FIRST_DETECTION_SECONDS: &str = "ilens_first_detection_seconds";

    /// Total enrichment jobs by outcome.
    pub const ENRICHMENT_JOBS_TOTAL: &str = "ilens_enrichment_jobs_total";

    /// Total canonical detections evicted by the capacity limit.
    pub const EVICTIONS_TOTAL: &str = "ilens_evictions_total";

    /// Items per finished session.
    pub const SESSION_ITEMS: &str = "ilens_session_items";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record a completed cloud identification attempt.
pub fn record_cloud_request(outcome: &str) {
    counter!(
        names::CLOUD_REQUESTS_TOTAL,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a newly created canonical detection.
pub fn record_detection(backend: &str) {
    counter!(
        names::DETECTIONS_TOTAL,
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record the latency from session start to the first detection.
pub fn record_first_detection(seconds: f64) {
    histogram!(names::FIRST_DETECTION_SECONDS).record(seconds);
}

/// Record a finished enrichment job.
pub fn record_enrichment_job(outcome: &str) {
    counter!(
        names::ENRICHMENT_JOBS_TOTAL,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record detections evicted by the capacity limit.
pub fn record_evictions(count: u64) {
    if count > 0 {
        counter!(names::EVICTIONS_TOTAL).increment(count);
    }
}

/// Record the item count of a finished session.
pub fn record_session_items(count: f64) {
    histogram!(names::SESSION_ITEMS).record(count);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::CLOUD_REQUESTS_TOTAL.contains("cloud_requests"));
        assert!(names::DETECTIONS_TOTAL.contains("detections"));
        assert!(names::FIRST_DETECTION_SECONDS.contains("first_detection"));
        assert!(names::ENRICHMENT_JOBS_TOTAL.contains("enrichment"));
        assert!(names::EVICTIONS_TOTAL.contains("evictions"));
    }
}
