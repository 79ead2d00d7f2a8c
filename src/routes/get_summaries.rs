//! `GET /trends/latest` and `GET /reports/{location}/{date}`.

use axum::{
    extract::Path, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::NaiveDate;
use tracing::{debug, error};

use super::{ApiError, ApiState};

// ---

pub fn router() -> Router<ApiState> {
    // ---
    Router::new()
        .route("/trends/latest", get(latest_trends))
        .route("/reports/{location}/{date}", get(daily_report))
}

async fn latest_trends(State(state): State<ApiState>) -> impl IntoResponse {
    // ---
    match state.summaries.latest_trends().await {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(snapshot)).into_response(),
        Ok(None) => ApiError::not_found("No trend data yet").into_response(),
        Err(e) => {
            error!("Failed to load trends: {}", e);
            ApiError::unavailable("Failed to load trends").into_response()
        }
    }
}

async fn daily_report(
    Path((location, date)): Path<(String, NaiveDate)>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    // ---
    debug!("GET /reports/{}/{}", location, date);

    match state.summaries.get_daily_report(date, &location).await {
        Ok(Some(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(None) => ApiError::not_found("No report for that day").into_response(),
        Err(e) => {
            error!("Failed to load daily report: {}", e);
            ApiError::unavailable("Failed to load report").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::{MemoryRecordStore, SummaryStore};
    use crate::summary::{DailyReport, TrendSnapshot};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn state(store: &Arc<MemoryRecordStore>) -> ApiState {
        ApiState::new(store.clone(), store.clone())
    }

    fn july_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    #[tokio::test]
    async fn test_no_trends_is_404() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let response = latest_trends(State(state(&store))).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_latest_trends_returned() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let hour = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();
        let snapshot = TrendSnapshot {
            hour,
            timestamp: hour,
            location: "backyard".into(),
            trends: BTreeMap::new(),
        };
        store.append_trends(&snapshot).await.unwrap();

        let response = latest_trends(State(state(&store))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let returned: TrendSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(returned, snapshot);
    }

    #[tokio::test]
    async fn test_report_lookup_by_location_and_date() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let report = DailyReport {
            date: july_first(),
            location: "backyard".into(),
            data_points: 3,
            summary: BTreeMap::new(),
            hourly: BTreeMap::new(),
        };
        store.insert_daily_report(&report).await.unwrap();

        let path = Path(("backyard".to_string(), july_first()));
        let response = daily_report(path, State(state(&store))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let path = Path(("frontyard".to_string(), july_first()));
        let response = daily_report(path, State(state(&store))).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_store_outage_is_503() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        store.set_offline(true);

        let path = Path(("backyard".to_string(), july_first()));
        let response = daily_report(path, State(state(&store))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
