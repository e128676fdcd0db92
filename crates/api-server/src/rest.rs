//! REST handlers for matching, response capture, rules and analytics.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use engage_analytics::{AnalyticsAggregator, AnalyticsReport, AnalyticsWindow};
use engage_core::catalog::{LoadReport, RuleCatalog};
use engage_core::config::AnalyticsConfig;
use engage_core::delivery::{DeliveryResponse, ResponseAction, ResponseOutcome};
use engage_core::error::EngageError;
use engage_core::types::{EngagementRule, Period};
use engage_engine::{EngagementEngine, MatchRequest};
use engage_frequency::PeriodBucket;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

/// Maximum identifier length accepted at the API boundary.
const MAX_FIELD_LEN: usize = 256;

/// How far ahead of the server clock an event timestamp may be.
const MAX_EVENT_SKEW_SECS: i64 = 60;

/// Longest analytics window a caller may request.
const MAX_WINDOW_DAYS: u32 = 365;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EngagementEngine>,
    pub aggregator: Arc<AnalyticsAggregator>,
    pub catalog: Arc<RuleCatalog>,
    pub analytics: AnalyticsConfig,
    pub node_id: String,
    pub start_time: Instant,
    pub ready: Arc<AtomicBool>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

impl From<EngageError> for ErrorResponse {
    fn from(e: EngageError) -> Self {
        Self {
            error: error_code(&e).to_string(),
            message: e.to_string(),
        }
    }
}

fn error_code(e: &EngageError) -> &'static str {
    match e {
        EngageError::Validation(_) => "invalid_request",
        EngageError::NotFound(_) => "not_found",
        EngageError::Configuration(_) => "invalid_configuration",
        EngageError::StoreUnavailable(_) => "store_unavailable",
        EngageError::Timeout(_) => "timeout",
        _ => "internal_error",
    }
}

fn map_engage_error(e: EngageError) -> ApiError {
    let status = match &e {
        EngageError::Validation(_) => StatusCode::BAD_REQUEST,
        EngageError::NotFound(_) => StatusCode::NOT_FOUND,
        EngageError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngageError::StoreUnavailable(_) | EngageError::Timeout(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "Request failed");
        metrics::counter!("api.errors").increment(1);
    }
    (status, Json(ErrorResponse::from(e)))
}

fn validate_id(name: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("'{name}' must not be empty"));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(format!("'{name}' exceeds maximum length"));
    }
    Ok(())
}

/// The event timestamp selects the frequency bucket, so it must fall in the
/// current hour (the finest period, nested in every coarser one).
fn validate_match_request(request: &MatchRequest, now: DateTime<Utc>) -> Result<(), String> {
    validate_id("client_app_id", &request.client_app_id)?;
    validate_id("user_id", &request.user_id)?;
    validate_id("event.event_type", &request.event.event_type)?;
    if request.event.user_id != request.user_id {
        return Err("'event.user_id' must equal 'user_id'".to_string());
    }
    let occurred_at = request.event.occurred_at;
    if occurred_at < PeriodBucket::containing(Period::Hour, now).start {
        return Err("'event.occurred_at' is before the current hour".to_string());
    }
    if occurred_at > now + Duration::seconds(MAX_EVENT_SKEW_SECS) {
        return Err("'event.occurred_at' is in the future".to_string());
    }
    Ok(())
}

/// POST /v1/match: evaluate one event; 204 when no rule fires.
pub async fn handle_match(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<Response, ApiError> {
    if let Err(msg) = validate_match_request(&request, Utc::now()) {
        warn!(user_id = %request.user_id, error = %msg, "Match request validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return Err(api_error(StatusCode::BAD_REQUEST, "invalid_match_request", msg));
    }

    match state.engine.process(&request).await {
        Ok(Some(outcome)) => Ok(Json(outcome).into_response()),
        Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(map_engage_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordResponseRequest {
    pub action_taken: ResponseAction,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordResponseResult {
    pub delivery_id: Uuid,
    pub recorded: bool,
    pub response: DeliveryResponse,
}

/// POST /v1/deliveries/:delivery_id/response: first response wins; a repeat
/// answers 409 with the response already on file.
pub async fn handle_record_response(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
    Json(request): Json<RecordResponseRequest>,
) -> Result<(StatusCode, Json<RecordResponseResult>), ApiError> {
    let observed_at = request.observed_at.unwrap_or_else(Utc::now);
    let outcome = state
        .engine
        .recorder()
        .record_response(delivery_id, request.action_taken, observed_at)
        .await
        .map_err(map_engage_error)?;

    let (status, recorded, response) = match outcome {
        ResponseOutcome::Recorded => (
            StatusCode::OK,
            true,
            DeliveryResponse {
                action_taken: request.action_taken,
                observed_at,
            },
        ),
        ResponseOutcome::AlreadyRecorded(existing) => (StatusCode::CONFLICT, false, existing),
    };
    Ok((
        status,
        Json(RecordResponseResult {
            delivery_id,
            recorded,
            response,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub days: Option<u32>,
}

/// GET /v1/apps/:app_id/analytics?days=N
pub async fn handle_analytics(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsReport>, ApiError> {
    if let Err(msg) = validate_id("app_id", &app_id) {
        return Err(api_error(StatusCode::BAD_REQUEST, "invalid_analytics_request", msg));
    }
    let days = query.days.unwrap_or(state.analytics.default_window_days);
    if days == 0 || days > MAX_WINDOW_DAYS {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_analytics_request",
            format!("'days' must be between 1 and {MAX_WINDOW_DAYS}"),
        ));
    }

    let cutoff = i64::try_from(state.analytics.no_response_cutoff_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX);
    let window = AnalyticsWindow::trailing_days(days, Utc::now(), cutoff);
    let timeout = std::time::Duration::from_millis(state.analytics.scan_timeout_ms);

    state
        .aggregator
        .aggregate_with_timeout(&app_id, &window, timeout)
        .await
        .map(Json)
        .map_err(map_engage_error)
}

#[derive(Debug, Default, Deserialize)]
pub struct RulesQuery {
    pub app_id: Option<String>,
}

/// GET /v1/rules: current catalog snapshot, optionally for one app.
pub async fn handle_list_rules(
    State(state): State<AppState>,
    Query(query): Query<RulesQuery>,
) -> Json<Vec<EngagementRule>> {
    let rules = match query.app_id {
        Some(app_id) => state.catalog.for_app(&app_id),
        None => state.catalog.snapshot().as_ref().clone(),
    };
    Json(rules)
}

/// PUT /v1/rules: replace the catalog snapshot. Invalid rules are dropped
/// and listed in the report.
pub async fn handle_replace_rules(
    State(state): State<AppState>,
    Json(rules): Json<Vec<EngagementRule>>,
) -> Json<LoadReport> {
    let report = state.catalog.replace(rules);
    metrics::counter!("api.rules_replaced").increment(1);
    Json(report)
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        rules_loaded: state.catalog.snapshot().len(),
    })
}

/// GET /ready: 200 once startup wiring has finished.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.ready.load(Ordering::Acquire) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub rules_loaded: usize,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}
