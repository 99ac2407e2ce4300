//! Aggregation Routes
//!
//! - POST /api/v1/aggregation/run - Trigger an aggregation pass now

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::AggregationResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// POST /api/v1/aggregation/run
///
/// Runs every due pass. Returns 409 if a pass is already running.
pub async fn run_aggregation(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<AggregationResponse>> {
    let reports = state.server.run_aggregation_pass().await?;
    Ok(Json(AggregationResponse::from(reports)))
}
