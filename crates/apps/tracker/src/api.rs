use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use foundation::Waypoint;
use serde::Deserialize;
use serde_json::{json, Value};
use streaming::RouteError;

use crate::tracker::Tracker;

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

pub async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

pub async fn get_map(State(state): State<AppState>) -> Response {
    let body = state.tracker.map_geojson();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "application/geo+json",
        )],
        Json(body),
    )
        .into_response()
}

pub async fn get_status(State(state): State<AppState>) -> Response {
    Json(state.tracker.status()).into_response()
}

pub async fn get_history(
    State(state): State<AppState>,
) -> Result<Json<feeds::LocationHistory>, (StatusCode, Json<Value>)> {
    state
        .tracker
        .history()
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "History recording is disabled"))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn get_events(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> Response {
    let limit = q.limit.clamp(1, runtime::EventBus::DEFAULT_CAPACITY);
    Json(state.tracker.recent_events(limit)).into_response()
}

pub async fn get_waypoints(State(state): State<AppState>) -> Json<Vec<Waypoint>> {
    Json(state.tracker.waypoints())
}

#[derive(Debug, Deserialize)]
pub struct WaypointsRequest {
    pub waypoints: Vec<Waypoint>,
}

/// Replace the waypoint set and route it.
///
/// An unavailable route is not an error here: the map shows the waypoints
/// and the route is retried in the background.
pub async fn put_waypoints(
    State(state): State<AppState>,
    Json(req): Json<WaypointsRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.tracker.set_waypoints(req.waypoints).await {
        Ok(route) => Ok(Json(json!({
            "route": route.key().to_string(),
            "points": route.points().len(),
            "distance_m": route.geometry().length_m(),
        }))),
        Err(RouteError::InvalidWaypoints(msg)) => Err(api_error(StatusCode::BAD_REQUEST, msg)),
        Err(RouteError::Unavailable(err)) => Ok(Json(json!({
            "route": null,
            "reason": err.to_string(),
        }))),
    }
}
