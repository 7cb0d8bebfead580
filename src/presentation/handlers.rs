// HTTP request handlers
use crate::application::curve::{self, Smoothing};
use crate::domain::chart::ChartSeries;
use crate::domain::reading::{Reading, TimeRange};
use crate::domain::statistics::{Analysis, HealthSummary};
use crate::infrastructure::event_stream::reading_events;
use crate::infrastructure::http_response::{ApiError, text_response};
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_HOURS: i64 = 24;
const DEFAULT_RECENT_LIMIT: usize = 100;
const MAX_RECENT_LIMIT: usize = 10_000;
const MAX_SUBDIVISIONS: usize = 32;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub hours: Option<i64>,
}

impl RangeQuery {
    fn window(&self, now: DateTime<Utc>) -> TimeRange {
        resolve_window(self.start, self.end, self.hours, now)
    }
}

/// Explicit bounds win; a missing end is now, a missing start is `hours`
/// (default 24, clamped) before the end. Reversed bounds are swapped.
fn resolve_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    hours: Option<i64>,
    now: DateTime<Utc>,
) -> TimeRange {
    let end = end.unwrap_or(now);
    let start =
        start.unwrap_or_else(|| TimeRange::last_hours(end, hours.unwrap_or(DEFAULT_HOURS)).start);
    TimeRange::new(start, end).normalized()
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<i64>,
}

impl HoursQuery {
    fn window(&self, now: DateTime<Utc>) -> Option<TimeRange> {
        self.hours.map(|hours| TimeRange::last_hours(now, hours))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub hours: Option<i64>,
    pub smoothing: Option<Smoothing>,
    /// Also return the curve flattened with this many steps per segment
    pub subdivisions: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub interval_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub stored_readings: usize,
    pub persistent: bool,
    pub degraded: bool,
    pub interval_secs: u64,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn latest_reading(State(state): State<Arc<AppState>>) -> ApiResult<Json<Reading>> {
    state
        .reading_service
        .latest()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no readings stored"))
}

/// Readings in a window, oldest first
pub async fn list_readings(
    Query(query): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Reading>>> {
    let window = query.window(Utc::now());
    Ok(Json(state.reading_service.range(window).await?))
}

/// Newest readings first
pub async fn recent_readings(
    Query(query): Query<RecentQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Reading>>> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_RECENT_LIMIT);
    Ok(Json(state.reading_service.recent(limit).await?))
}

pub async fn clear_readings(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.reading_service.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Take one sample now. 204 when no source produced a storable reading.
pub async fn take_sample(State(state): State<Arc<AppState>>) -> Response {
    match state.sampler.sample_once().await {
        Some(reading) => Json(reading).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn statistics(
    Query(query): Query<HoursQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Analysis>> {
    let window = query.window(Utc::now());
    Ok(Json(state.reading_service.statistics(window).await?))
}

/// Plain-text rendering of the statistics
pub async fn statistics_report(
    Query(query): Query<HoursQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let window = query.window(Utc::now());
    let analysis = state.reading_service.statistics(window).await?;
    let body = match analysis.report() {
        Some(report) => report.to_string(),
        None => "No charging data available\n".to_string(),
    };
    Ok(text_response(body))
}

pub async fn battery_health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthSummary>> {
    state
        .reading_service
        .health()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no capacity data recorded"))
}

pub async fn chart(
    Query(query): Query<ChartQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ChartSeries>> {
    let window = resolve_window(query.start, query.end, query.hours, Utc::now());
    let smoothing = query.smoothing.unwrap_or_default();

    let mut series = state.reading_service.chart(window, smoothing).await?;
    if let Some(subdivisions) = query.subdivisions {
        let subdivisions = subdivisions.clamp(1, MAX_SUBDIVISIONS);
        series.polyline = Some(curve::sample(&series.power_curve, subdivisions));
    }
    Ok(Json(series))
}

/// Server-sent events, one per committed reading
pub async fn reading_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Event subscriber connected");
    reading_events(state.sampler.subscribe())
}

pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(StatusResponse {
        stored_readings: state.reading_service.count().await?,
        persistent: state.reading_service.is_persistent(),
        degraded: state.sampler.is_degraded(),
        interval_secs: state.sampler.interval().as_secs(),
    }))
}

/// Change the sampling period at runtime; the applied (clamped) value is reported back.
pub async fn set_interval(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IntervalRequest>,
) -> ApiResult<Json<StatusResponse>> {
    if request.interval_secs == 0 {
        return Err(ApiError::bad_request("interval_secs must be positive"));
    }
    state
        .sampler
        .set_interval(std::time::Duration::from_secs(request.interval_secs));
    status(State(state)).await
}
