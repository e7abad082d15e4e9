use std::sync::Arc;
use std::time::Instant;

use feeds::{FeedUpdate, HistoryStore, LocationHistory};
use foundation::{Position, Waypoint};
use layers::{DisplayStatus, FeedStatus, GeoJsonSurface, MapRenderer, RouteStatus};
use parking_lot::Mutex;
use runtime::{metrics::names, Event, EventBus, EventKind, Metrics, MetricsSnapshot};
use serde::Serialize;
use serde_json::Value;
use streaming::{validate_waypoints, Route, RouteCache, RouteError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub router: String,
    pub waypoints: Vec<Waypoint>,
    pub display: DisplayStatus,
    /// Route unavailable or feed stale.
    pub degraded: bool,
    pub metrics: MetricsSnapshot,
}

/// One tracking session: a waypoint set, its route, and the vehicle marker.
///
/// Feed updates are applied one at a time in delivery order. Locks are never
/// held across an `.await`.
pub struct Tracker {
    routes: RouteCache,
    renderer: Mutex<MapRenderer<GeoJsonSurface>>,
    waypoints: Mutex<Vec<Waypoint>>,
    history: Option<HistoryStore>,
    events: Mutex<EventBus>,
    metrics: Mutex<Metrics>,
}

impl Tracker {
    pub fn new(routes: RouteCache, waypoints: Vec<Waypoint>, history: Option<HistoryStore>) -> Self {
        let mut renderer = MapRenderer::new(GeoJsonSurface::new());
        renderer.show_waypoints(&waypoints);
        Self {
            routes,
            renderer: Mutex::new(renderer),
            waypoints: Mutex::new(waypoints),
            history,
            events: Mutex::new(EventBus::new()),
            metrics: Mutex::new(Metrics::new()),
        }
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        self.waypoints.lock().clone()
    }

    /// Switch to a new waypoint set. Routes for other sets are dropped.
    ///
    /// A set that cannot be routed is rejected before anything changes.
    pub async fn set_waypoints(&self, waypoints: Vec<Waypoint>) -> Result<Arc<Route>, RouteError> {
        validate_waypoints(&waypoints)?;
        {
            let mut current = self.waypoints.lock();
            if *current != waypoints {
                *current = waypoints.clone();
                let dropped = self.routes.retain_only(&waypoints);
                debug!("dropped {} cached route(s)", dropped.len());
                self.renderer.lock().show_waypoints(&waypoints);
                self.events.lock().emit(
                    EventKind::WaypointsChanged,
                    format!("{} waypoint(s)", waypoints.len()),
                );
            }
        }
        self.load_route().await
    }

    /// Fetch (or reuse) the route for the current waypoints and draw it.
    ///
    /// On failure the map falls back to waypoint markers only; the error is
    /// still returned so the caller can schedule a retry.
    pub async fn load_route(&self) -> Result<Arc<Route>, RouteError> {
        let waypoints = self.waypoints();
        let started = Instant::now();
        let result = self.routes.get_route(&waypoints).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(route) => {
                // Held until drawn. Lock order: waypoints, then renderer.
                let current = self.waypoints.lock();
                if !route.matches(&current) {
                    debug!("discarding route {} for stale waypoints", route.key().short());
                    return Ok(route);
                }
                let newly_drawn = {
                    let mut renderer = self.renderer.lock();
                    let before = renderer.route_key();
                    renderer.initialize(&route);
                    before != Some(route.key())
                };
                drop(current);
                if newly_drawn {
                    self.metrics
                        .lock()
                        .record_latency(names::ROUTE_LATENCY_MS, elapsed_ms);
                    self.events.lock().emit(
                        EventKind::RouteReady,
                        format!(
                            "route {} ({} points, {:.1} km)",
                            route.key().short(),
                            route.points().len(),
                            route.geometry().length_m() / 1000.0
                        ),
                    );
                }
                Ok(route)
            }
            Err(err) => {
                warn!("{err}");
                self.metrics.lock().inc(names::ROUTE_FAILURES);
                {
                    let current = self.waypoints.lock();
                    if *current == waypoints {
                        self.renderer
                            .lock()
                            .initialize_without_route(&waypoints, err.to_string());
                    }
                }
                self.events
                    .lock()
                    .emit(EventKind::RouteUnavailable, err.to_string());
                Err(err)
            }
        }
    }

    /// True while the current waypoints have no drawn route.
    pub fn needs_route(&self) -> bool {
        !matches!(self.renderer.lock().status().route, RouteStatus::Drawn { .. })
    }

    pub async fn apply_update(&self, update: FeedUpdate) {
        self.metrics.lock().inc(names::FEED_POLLS);
        match update {
            FeedUpdate::Position(position) => {
                self.show_position(position.clone());
                self.record_history(&position).await;
            }
            FeedUpdate::Unchanged(position) => {
                {
                    let mut metrics = self.metrics.lock();
                    metrics.inc(names::FEED_STALE_SKIPPED);
                    metrics.set_gauge(names::FEED_CONSECUTIVE_FAILURES, 0);
                }
                let recovered = self.renderer.lock().mark_feed_live();
                let coord = position.coord();
                let mut events = self.events.lock();
                if recovered {
                    info!("feed recovered at {coord}");
                    events.emit_at(EventKind::FeedRecovered, coord, "feed recovered");
                }
                events.emit_at(EventKind::PositionIgnored, coord, "no newer fix");
            }
            FeedUpdate::Unavailable {
                error,
                last_known,
                consecutive_failures,
            } => {
                {
                    let mut metrics = self.metrics.lock();
                    metrics.inc(names::FEED_FAILURES);
                    metrics.set_gauge(
                        names::FEED_CONSECUTIVE_FAILURES,
                        i64::from(consecutive_failures),
                    );
                }
                let mut renderer = self.renderer.lock();
                if renderer.vehicle().is_none() {
                    if let Some(p) = last_known {
                        renderer.update_vehicle(p);
                    }
                }
                renderer.mark_feed_unavailable(error.to_string());
                drop(renderer);
                self.events.lock().emit(
                    EventKind::FeedUnavailable,
                    format!("{error} (failure {consecutive_failures})"),
                );
            }
        }
    }

    fn show_position(&self, position: Position) {
        let coord = position.coord();
        let (was_stale, accepted) = {
            let mut renderer = self.renderer.lock();
            let was_stale = matches!(renderer.status().feed, FeedStatus::Stale { .. });
            (was_stale, renderer.update_vehicle(position))
        };
        self.metrics
            .lock()
            .set_gauge(names::FEED_CONSECUTIVE_FAILURES, 0);
        if accepted {
            self.metrics.lock().inc(names::RENDER_VEHICLE_UPDATES);
        }

        let mut events = self.events.lock();
        if was_stale {
            info!("feed recovered at {coord}");
            events.emit_at(EventKind::FeedRecovered, coord, "feed recovered");
        }
        if accepted {
            events.emit_at(EventKind::PositionUpdated, coord, "vehicle marker updated");
        } else {
            events.emit_at(
                EventKind::PositionIgnored,
                coord,
                "older than the displayed position",
            );
        }
    }

    async fn record_history(&self, position: &Position) {
        let Some(history) = &self.history else {
            return;
        };
        match history.record(position).await {
            Ok(true) => {
                self.metrics.lock().inc(names::HISTORY_ENTRIES);
                self.events.lock().emit_at(
                    EventKind::HistoryRecorded,
                    position.coord(),
                    format!("saved to {}", history.path().display()),
                );
            }
            Ok(false) => {}
            Err(err) => warn!("failed to record history: {err}"),
        }
    }

    pub fn status(&self) -> StatusReport {
        let metrics = {
            let mut metrics = self.metrics.lock();
            metrics.set_gauge(names::ROUTE_REQUESTS, self.routes.requests_issued() as i64);
            metrics.set_gauge(names::ROUTE_CACHE_HITS, self.routes.cache_hits() as i64);
            metrics.snapshot()
        };
        let display = self.renderer.lock().status().clone();
        StatusReport {
            router: self.routes.router_name().to_string(),
            waypoints: self.waypoints(),
            degraded: display.is_degraded(),
            display,
            metrics,
        }
    }

    pub fn map_geojson(&self) -> Value {
        self.renderer.lock().surface().to_geojson_value()
    }

    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.events.lock().recent(n)
    }

    pub async fn history(&self) -> Option<LocationHistory> {
        match &self.history {
            Some(store) => Some(store.snapshot().await),
            None => None,
        }
    }
}
