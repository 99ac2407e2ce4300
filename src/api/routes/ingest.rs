//! Ingest Routes
//!
//! - POST /api/v1/samples - Batch of raw samples
//!
//! The handler waits for the whole batch to finish before replying, so the
//! response reports per-sample outcomes.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::{IngestRequest, IngestResponse, SampleDto, SampleError};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::server::IngestTracker;
use crate::storage::Sample;

/// POST /api/v1/samples
///
/// Ingest a batch of samples.
pub async fn ingest_samples(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    if req.samples.is_empty() {
        return Err(ApiError::Validation("Empty batch".to_string()));
    }

    if req.samples.len() > state.config.max_batch_size {
        return Err(ApiError::Validation(format!(
            "Batch size exceeds maximum of {} samples",
            state.config.max_batch_size
        )));
    }

    let now = state.server.now_millis();
    let samples = req
        .samples
        .iter()
        .map(|dto| to_sample(dto, now))
        .collect::<ApiResult<Vec<Sample>>>()?;

    let tracker = Arc::new(IngestTracker::new());
    state.server.ingest(samples, tracker.clone()).await?;
    let outcome = tracker.wait().await;

    let errors: Vec<SampleError> = outcome
        .failed
        .into_iter()
        .map(|f| SampleError {
            series_id: f.sample.series_id,
            timestamp: f.sample.timestamp,
            error: f.error,
        })
        .collect();

    let (status, status_str) = if errors.is_empty() {
        (StatusCode::CREATED, "ok")
    } else if outcome.succeeded > 0 {
        (StatusCode::MULTI_STATUS, "partial")
    } else {
        (StatusCode::BAD_REQUEST, "failed")
    };

    Ok((
        status,
        Json(IngestResponse {
            status: status_str.to_string(),
            accepted: outcome.succeeded,
            rejected: errors.len(),
            errors,
        }),
    ))
}

/// Validate a sample and fill in its timestamp
fn to_sample(dto: &SampleDto, now: i64) -> ApiResult<Sample> {
    if !dto.value.is_finite() {
        return Err(ApiError::Validation("Value must be a finite number".to_string()));
    }

    let timestamp = dto.timestamp.unwrap_or(now);
    let one_year_ms = 365 * 24 * 60 * 60 * 1000_i64;

    if timestamp < now - one_year_ms * 10 {
        return Err(ApiError::Validation(
            "Timestamp is more than 10 years in the past".to_string(),
        ));
    }

    if timestamp > now + one_year_ms {
        return Err(ApiError::Validation(
            "Timestamp is more than 1 year in the future".to_string(),
        ));
    }

    Ok(Sample::new(dto.series_id, timestamp, dto.value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_to_sample_valid() {
        let dto = SampleDto {
            series_id: 3,
            value: 7.5,
            timestamp: None,
        };
        assert_eq!(to_sample(&dto, NOW).unwrap(), Sample::new(3, NOW, 7.5));
    }

    #[test]
    fn test_to_sample_invalid_value() {
        let dto = SampleDto {
            series_id: 3,
            value: f64::INFINITY,
            timestamp: None,
        };
        assert!(to_sample(&dto, NOW).is_err());
    }

    #[test]
    fn test_to_sample_far_future() {
        let dto = SampleDto {
            series_id: 3,
            value: 1.0,
            timestamp: Some(NOW + 2 * 365 * 24 * 3_600_000),
        };
        assert!(to_sample(&dto, NOW).is_err());
    }
}
