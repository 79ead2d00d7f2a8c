//! Read-only status API.
//!
//! Gateway for the HTTP routes: each sibling module exports a subrouter and
//! this module merges them and attaches the shared state. Nothing here writes
//! to the store; the sampling loop is the only writer.

use std::sync::Arc;

use axum::{http::StatusCode, Json, Router};
use serde::Serialize;

use crate::store::{RecordStore, SummaryStore};

mod get_readings;
mod get_records;
mod get_summaries;
mod health;

// ---

/// State shared by all routes.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn RecordStore>,
    pub summaries: Arc<dyn SummaryStore>,
}

impl ApiState {
    pub fn new(store: Arc<dyn RecordStore>, summaries: Arc<dyn SummaryStore>) -> Self {
        Self { store, summaries }
    }
}

/// JSON error body returned when the store cannot answer.
#[derive(Debug, Serialize)]
pub(crate) struct ApiError {
    error: &'static str,
}

impl ApiError {
    pub(crate) fn unavailable(error: &'static str) -> (StatusCode, Json<ApiError>) {
        (StatusCode::SERVICE_UNAVAILABLE, Json(ApiError { error }))
    }

    pub(crate) fn not_found(error: &'static str) -> (StatusCode, Json<ApiError>) {
        (StatusCode::NOT_FOUND, Json(ApiError { error }))
    }
}

pub fn router(store: Arc<dyn RecordStore>, summaries: Arc<dyn SummaryStore>) -> Router {
    // ---
    Router::new()
        .merge(get_readings::router())
        .merge(get_records::router())
        .merge(get_summaries::router())
        .merge(health::router())
        .with_state(ApiState::new(store, summaries))
}
