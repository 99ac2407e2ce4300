//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};

use crate::rollup::{AggregationReport, Bucket, TransitionStatus};

// ============================================
// INGEST DTOs
// ============================================

/// One sample in an ingest request
#[derive(Debug, Deserialize)]
pub struct SampleDto {
    pub series_id: u32,
    pub value: f64,
    /// Optional timestamp (ms since epoch), defaults to now
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Ingest request
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub samples: Vec<SampleDto>,
}

/// Ingest response
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Status: "ok", "partial" or "failed"
    pub status: String,
    /// Number of samples stored
    pub accepted: usize,
    /// Number of samples rejected
    pub rejected: usize,
    /// Errors for rejected samples
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SampleError>,
}

/// Error for a single sample
#[derive(Debug, Serialize)]
pub struct SampleError {
    pub series_id: u32,
    pub timestamp: i64,
    pub error: String,
}

// ============================================
// QUERY DTOs
// ============================================

/// `?begin=..&end=..`
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub begin: i64,
    pub end: i64,
}

/// `?begin=..&end=..&buckets=..`
#[derive(Debug, Deserialize)]
pub struct DataParams {
    pub begin: i64,
    pub end: i64,
    #[serde(default = "default_buckets")]
    pub buckets: usize,
}

fn default_buckets() -> usize {
    60
}

/// Summary over a group of series
#[derive(Debug, Deserialize)]
pub struct GroupSummaryRequest {
    pub series_ids: Vec<u32>,
    pub begin: i64,
    pub end: i64,
}

/// Downsampled data over a group of series
#[derive(Debug, Deserialize)]
pub struct GroupDataRequest {
    pub series_ids: Vec<u32>,
    pub begin: i64,
    pub end: i64,
    #[serde(default = "default_buckets")]
    pub buckets: usize,
}

/// Downsampled data response
#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub begin: i64,
    pub end: i64,
    pub buckets: Vec<Bucket>,
}

// ============================================
// AGGREGATION DTOs
// ============================================

/// Result of a triggered aggregation run
#[derive(Debug, Serialize)]
pub struct AggregationResponse {
    /// Passes executed, including replayed hours
    pub passes: usize,
    /// Windows rolled into the next tier
    pub aggregated_windows: usize,
    /// Windows that failed and will be retried
    pub failed_windows: usize,
    pub reports: Vec<AggregationReport>,
}

impl From<Vec<AggregationReport>> for AggregationResponse {
    fn from(reports: Vec<AggregationReport>) -> Self {
        let count = |pred: fn(&TransitionStatus) -> bool| {
            reports
                .iter()
                .flat_map(|r| r.transitions.iter())
                .filter(|t| pred(&t.status))
                .count()
        };

        let aggregated_windows = count(|s| matches!(s, TransitionStatus::Aggregated { .. }));
        let failed_windows = count(|s| matches!(s, TransitionStatus::Failed { .. }));

        Self {
            passes: reports.len(),
            aggregated_windows,
            failed_windows,
            reports,
        }
    }
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", "degraded" or "unhealthy"
    pub status: String,
    pub storage: String,
    pub ingest_permits_available: usize,
    pub ingest_permits_total: usize,
    pub uptime_seconds: u64,
    pub version: String,
}
