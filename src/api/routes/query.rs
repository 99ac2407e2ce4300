//! Query Routes
//!
//! - GET /api/v1/series/:id/summary?begin&end - Summary of one series
//! - GET /api/v1/series/:id/data?begin&end&buckets - Downsampled series
//! - GET /api/v1/series/:id/latest - Most recent raw sample
//! - POST /api/v1/groups/summary - Summary over several series
//! - POST /api/v1/groups/data - Downsampled group

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{DataParams, DataResponse, GroupDataRequest, GroupSummaryRequest, RangeParams};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::server::Summary;
use crate::storage::Sample;

/// GET /api/v1/series/:id/summary
pub async fn series_summary(
    State(state): State<Arc<AppState>>,
    Path(series_id): Path<u32>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<Summary>> {
    let summary = state
        .server
        .summary_aggregate(series_id, params.begin, params.end)
        .await?;
    Ok(Json(summary))
}

/// GET /api/v1/series/:id/data
pub async fn series_data(
    State(state): State<Arc<AppState>>,
    Path(series_id): Path<u32>,
    Query(params): Query<DataParams>,
) -> ApiResult<Json<DataResponse>> {
    check_buckets(&state, params.buckets)?;
    let buckets = state
        .server
        .find_data(series_id, params.begin, params.end, params.buckets)
        .await?;

    Ok(Json(DataResponse {
        begin: params.begin,
        end: params.end,
        buckets,
    }))
}

/// GET /api/v1/series/:id/latest
pub async fn series_latest(
    State(state): State<Arc<AppState>>,
    Path(series_id): Path<u32>,
) -> ApiResult<Json<Sample>> {
    state
        .server
        .find_latest_value(series_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No samples for series {}", series_id)))
}

/// POST /api/v1/groups/summary
pub async fn group_summary(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GroupSummaryRequest>,
) -> ApiResult<Json<Summary>> {
    check_group(&req.series_ids)?;
    let summary = state
        .server
        .group_summary_aggregate(&req.series_ids, req.begin, req.end)
        .await?;
    Ok(Json(summary))
}

/// POST /api/v1/groups/data
pub async fn group_data(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GroupDataRequest>,
) -> ApiResult<Json<DataResponse>> {
    check_group(&req.series_ids)?;
    check_buckets(&state, req.buckets)?;
    let buckets = state
        .server
        .find_group_data(&req.series_ids, req.begin, req.end, req.buckets)
        .await?;

    Ok(Json(DataResponse {
        begin: req.begin,
        end: req.end,
        buckets,
    }))
}

fn check_group(series_ids: &[u32]) -> ApiResult<()> {
    if series_ids.is_empty() {
        return Err(ApiError::Validation("series_ids cannot be empty".to_string()));
    }
    Ok(())
}

fn check_buckets(state: &AppState, buckets: usize) -> ApiResult<()> {
    if buckets > state.config.max_buckets {
        return Err(ApiError::Validation(format!(
            "At most {} buckets may be requested",
            state.config.max_buckets
        )));
    }
    Ok(())
}
