//! `GET /records` - current all-time highs and lows.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Deserialize;
use tracing::{error, info};

use super::{ApiError, ApiState};
use crate::models::{Direction, ExtremumRecord};

// ---

pub fn router() -> Router<ApiState> {
    // ---
    Router::new().route("/records", get(handler))
}

/// Query parameters for filtering records
#[derive(Debug, Default, Deserialize)]
pub struct RecordsQuery {
    metric: Option<String>,
    direction: Option<Direction>,
}

async fn handler(
    Query(params): Query<RecordsQuery>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    // ---
    match state.store.list_extrema().await {
        Ok(records) => {
            let records = apply_filters(records, &params);
            info!("GET /records - returning {} records", records.len());
            (StatusCode::OK, Json(records)).into_response()
        }
        Err(e) => {
            error!("Failed to load records: {}", e);
            ApiError::unavailable("Failed to load records").into_response()
        }
    }
}

/// Apply query filters to extremum records
fn apply_filters(records: Vec<ExtremumRecord>, params: &RecordsQuery) -> Vec<ExtremumRecord> {
    // ---
    records
        .into_iter()
        .filter(|r| params.metric.as_ref().map_or(true, |m| &r.metric == m))
        .filter(|r| params.direction.map_or(true, |d| r.direction == d))
        .collect()
}
