//! Engine error types

use crate::storage::StorageError;
use thiserror::Error;

/// Errors returned by the metrics server
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The requested begin time is older than every tier's retention
    #[error("Begin time {begin} is outside every retention range")]
    OutOfRange { begin: i64 },

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The server has been shut down
    #[error("Metrics server is shut down")]
    ShutDown,

    /// Another aggregation pass holds the pipeline
    #[error("An aggregation pass is already running")]
    AggregationInProgress,

    /// Store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MetricsError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MetricsError::Storage(_) | MetricsError::AggregationInProgress
        )
    }
}

/// Result type alias for engine operations
pub type MetricsResult<T> = Result<T, MetricsError>;
