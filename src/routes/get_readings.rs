//! `GET /readings/latest` - newest measurements from the log.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Deserialize;
use tracing::{debug, error};

use super::{ApiError, ApiState};

// ---

const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 1000;

pub fn router() -> Router<ApiState> {
    // ---
    Router::new().route("/readings/latest", get(handler))
}

/// Query parameters for the latest readings
#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    limit: Option<u32>,
}

impl LatestQuery {
    fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

async fn handler(
    Query(params): Query<LatestQuery>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    // ---
    let limit = params.effective_limit();
    debug!("GET /readings/latest - limit {}", limit);

    match state.store.latest_measurements(limit).await {
        Ok(measurements) => (StatusCode::OK, Json(measurements)).into_response(),
        Err(e) => {
            error!("Failed to load latest readings: {}", e);
            ApiError::unavailable("Failed to load readings").into_response()
        }
    }
}
