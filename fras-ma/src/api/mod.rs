//! HTTP control surface for the attendance engine
//!
//! **Routes:**
//! - `GET /health`
//! - `GET /session`, `POST /session/start`, `POST /session/stop`,
//!   `POST /session/submit`, `POST /session/recognitions`
//! - `GET /attendance/:date`, `GET /attendance?start=&end=`
//! - `GET /events` (SSE)

pub mod handlers;
pub mod sse;

use crate::engine::ReconciliationEngine;
use axum::{
    routing::{get, post},
    Router,
};
use fras_common::storage::PartitionStore;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub store: Arc<PartitionStore>,
    /// Server port
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Session control
        .route("/session", get(handlers::get_session))
        .route("/session/start", post(handlers::start_session))
        .route("/session/stop", post(handlers::stop_session))
        .route("/session/submit", post(handlers::submit_session))
        .route("/session/recognitions", post(handlers::post_recognition))
        // Attendance queries
        .route("/attendance", get(handlers::get_attendance_range))
        .route("/attendance/:date", get(handlers::get_attendance_for_date))
        // SSE events
        .route("/events", get(sse::event_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
