//! HTTP request handlers
//!
//! Every failure is returned as `{ "status": "error", "error": "<message>" }`
//! with a status code derived from the error kind (see [`ApiError`]).

use crate::api::AppState;
use crate::engine::{RecognitionEvent, SessionSnapshot, SubmitOutcome};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use fras_common::models::AttendanceRecord;
use fras_common::storage::PartitionKind;
use fras_common::time::{date_key, parse_date_key};
use fras_common::Error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    port: u16,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default)]
    program: String,
    #[serde(default)]
    subject: String,
}

#[derive(Debug, Deserialize)]
pub struct AttendanceRangeQuery {
    start: String,
    end: String,
    /// Degree program, matched case-insensitively
    #[serde(default)]
    program: Option<String>,
    /// Student index number, matched exactly
    #[serde(default)]
    student: Option<String>,
}

impl AttendanceRangeQuery {
    fn matches(&self, record: &AttendanceRecord) -> bool {
        let program_ok = self.program.as_deref().map_or(true, |p| {
            record.degree_program.trim().eq_ignore_ascii_case(p.trim())
        });
        let student_ok = self
            .student
            .as_deref()
            .map_or(true, |key| record.student_key.as_str() == key.trim());
        program_ok && student_ok
    }
}

#[derive(Debug, Serialize)]
pub struct AttendanceResponse {
    start: NaiveDate,
    end: NaiveDate,
    count: usize,
    records: Vec<AttendanceRecord>,
}

/// Domain error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::Precondition(_) => StatusCode::CONFLICT,
            Error::InvalidInput(_) | Error::Codec(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Permission(_) => StatusCode::FORBIDDEN,
            Error::Network(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) | Error::Config(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (
            status,
            Json(json!({ "status": "error", "error": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "fras-ma".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        port: state.port,
    })
}

// ============================================================================
// Session Endpoints
// ============================================================================

/// GET /session - Current engine snapshot
pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.engine.snapshot().await)
}

/// POST /session/start - Start a session for today
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    info!("Start session request: {} / {}", req.program, req.subject);
    let snapshot = state.engine.start(&req.program, &req.subject).await?;
    Ok(Json(snapshot))
}

/// POST /session/stop - Discard the session and release capture
pub async fn stop_session(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    state.engine.stop().await?;
    Ok(Json(StatusResponse {
        status: "stopped".to_string(),
    }))
}

/// POST /session/submit - Persist newly present students
pub async fn submit_session(State(state): State<AppState>) -> ApiResult<Json<SubmitOutcome>> {
    let outcome = state.engine.submit().await?;
    Ok(Json(outcome))
}

/// POST /session/recognitions - Queue a recognition event
pub async fn post_recognition(
    State(state): State<AppState>,
    Json(event): Json<RecognitionEvent>,
) -> ApiResult<StatusCode> {
    state.engine.recognize(&event.name).await?;
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Attendance Endpoints
// ============================================================================

/// GET /attendance/:date - Attendance for one date
pub async fn get_attendance_for_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Json<AttendanceResponse>> {
    let date = parse_date_key(&date)?;
    let records = state
        .store
        .read_partition(PartitionKind::Attendance, &date_key(date))
        .await?;
    Ok(Json(attendance_response(date, date, &records)?))
}

/// GET /attendance?start=&end=[&program=][&student=] - Attendance over an
/// inclusive date range
pub async fn get_attendance_range(
    State(state): State<AppState>,
    Query(query): Query<AttendanceRangeQuery>,
) -> ApiResult<Json<AttendanceResponse>> {
    let start = parse_date_key(&query.start)?;
    let end = parse_date_key(&query.end)?;
    let records = state.store.read_attendance_between(start, end).await?;
    let mut response = attendance_response(start, end, &records)?;
    response.records.retain(|record| query.matches(record));
    response.count = response.records.len();
    Ok(Json(response))
}

fn attendance_response(
    start: NaiveDate,
    end: NaiveDate,
    records: &[fras_common::codec::Record],
) -> Result<AttendanceResponse, Error> {
    let records = records
        .iter()
        .map(AttendanceRecord::from_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AttendanceResponse {
        start,
        end,
        count: records.len(),
        records,
    })
}
