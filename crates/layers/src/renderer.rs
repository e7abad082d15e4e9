use foundation::{GeoBounds, Position, Waypoint};
use serde::Serialize;
use streaming::{Route, RouteKey};
use tracing::{debug, info, warn};

use crate::layer::LayerId;
use crate::surface::{MapSurface, RenderCommand};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RouteStatus {
    Pending,
    Drawn {
        key: RouteKey,
        #[serde(skip_serializing_if = "Option::is_none")]
        distance_m: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_s: Option<f64>,
    },
    Unavailable {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    /// No fix received yet.
    Waiting,
    Live,
    /// The feed is failing; the marker shows the last-known position.
    Stale {
        reason: String,
    },
}

/// What the viewer is currently shown, including degraded states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayStatus {
    pub route: RouteStatus,
    pub feed: FeedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<Position>,
}

impl Default for DisplayStatus {
    fn default() -> Self {
        Self {
            route: RouteStatus::Pending,
            feed: FeedStatus::Waiting,
            vehicle: None,
        }
    }
}

impl DisplayStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self.route, RouteStatus::Unavailable { .. })
            || matches!(self.feed, FeedStatus::Stale { .. })
    }
}

/// Draws a route and a vehicle marker onto a `MapSurface`.
///
/// Never fetches anything: the route is handed in by the caller, and every
/// method is safe to call any number of times.
pub struct MapRenderer<S> {
    surface: S,
    route_key: Option<RouteKey>,
    waypoints: Vec<Waypoint>,
    status: DisplayStatus,
}

impl<S: MapSurface> MapRenderer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            route_key: None,
            waypoints: Vec::new(),
            status: DisplayStatus::default(),
        }
    }

    pub fn status(&self) -> &DisplayStatus {
        &self.status
    }

    pub fn route_key(&self) -> Option<RouteKey> {
        self.route_key
    }

    pub fn vehicle(&self) -> Option<&Position> {
        self.status.vehicle.as_ref()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Draw the waypoint markers and mark the route as pending.
    ///
    /// An already drawn route for different waypoints is cleared.
    pub fn show_waypoints(&mut self, waypoints: &[Waypoint]) {
        if self.waypoints == waypoints {
            return;
        }
        let key = RouteKey::for_waypoints(waypoints);
        if self.route_key.is_some_and(|k| k != key) {
            self.clear_route();
        }
        self.draw_waypoints(waypoints);
        if self.route_key.is_none() {
            self.status.route = RouteStatus::Pending;
        }
        self.fit_view(waypoint_bounds(waypoints));
        self.push_status();
    }

    /// Draw `route`. Same key as the current path is a no-op; a different key
    /// replaces it.
    pub fn initialize(&mut self, route: &Route) {
        if self.route_key == Some(route.key()) {
            debug!("route {} already drawn", route.key().short());
            return;
        }
        if self.route_key.is_some() {
            self.clear_route();
        }

        self.surface.submit(RenderCommand::DrawRoute {
            layer: LayerId::ROUTE,
            key: route.key(),
            points: route.points().to_vec(),
        });
        self.route_key = Some(route.key());
        if self.waypoints != route.waypoints() {
            self.draw_waypoints(route.waypoints());
        }
        self.fit_view(route.bounds());

        self.status.route = RouteStatus::Drawn {
            key: route.key(),
            distance_m: route.distance_m(),
            duration_s: route.duration_s(),
        };
        info!(
            "drew route {} ({} points)",
            route.key().short(),
            route.points().len()
        );
        self.push_status();
    }

    /// Degraded mode: no path, but waypoint markers and the reason are shown.
    pub fn initialize_without_route(&mut self, waypoints: &[Waypoint], reason: impl Into<String>) {
        let reason = reason.into();
        if self.route_key.is_some() {
            self.clear_route();
        }
        if self.waypoints != waypoints {
            self.draw_waypoints(waypoints);
        }
        self.fit_view(waypoint_bounds(waypoints));
        warn!("rendering without route: {reason}");
        self.status.route = RouteStatus::Unavailable { reason };
        self.push_status();
    }

    /// Create or move the vehicle marker.
    ///
    /// A position observed before the one on display is ignored and `false`
    /// is returned. A successful update clears a stale feed status.
    pub fn update_vehicle(&mut self, position: Position) -> bool {
        let command = match &self.status.vehicle {
            Some(current) if position.is_older_than(current) => {
                debug!(
                    "ignoring vehicle fix from {} (showing {})",
                    position.observed_at(),
                    current.observed_at()
                );
                return false;
            }
            Some(_) => RenderCommand::MoveMarker {
                layer: LayerId::VEHICLE,
                position: position.clone(),
            },
            None => RenderCommand::PlaceMarker {
                layer: LayerId::VEHICLE,
                position: position.clone(),
            },
        };
        self.surface.submit(command);
        self.status.vehicle = Some(position);
        self.status.feed = FeedStatus::Live;
        self.push_status();
        true
    }

    /// The marker stays where it is; only the status changes.
    pub fn mark_feed_unavailable(&mut self, reason: impl Into<String>) {
        self.status.feed = FeedStatus::Stale {
            reason: reason.into(),
        };
        self.push_status();
    }

    /// The feed answered again without a newer fix. Clears a stale status
    /// and returns whether there was one; the marker is not touched.
    pub fn mark_feed_live(&mut self) -> bool {
        if !matches!(self.status.feed, FeedStatus::Stale { .. }) {
            return false;
        }
        self.status.feed = if self.status.vehicle.is_some() {
            FeedStatus::Live
        } else {
            FeedStatus::Waiting
        };
        self.push_status();
        true
    }

    fn clear_route(&mut self) {
        self.surface.submit(RenderCommand::ClearRoute {
            layer: LayerId::ROUTE,
        });
        self.route_key = None;
    }

    fn draw_waypoints(&mut self, waypoints: &[Waypoint]) {
        self.waypoints = waypoints.to_vec();
        self.surface.submit(RenderCommand::DrawWaypoints {
            layer: LayerId::WAYPOINTS,
            waypoints: self.waypoints.clone(),
        });
    }

    fn fit_view(&mut self, bounds: Option<GeoBounds>) {
        let vehicle = self
            .status
            .vehicle
            .as_ref()
            .map(|p| GeoBounds::around(p.coord()));
        let bounds = match (bounds, vehicle) {
            (Some(b), Some(v)) => Some(b.union(v)),
            (b, v) => b.or(v),
        };
        if let Some(bounds) = bounds {
            self.surface.submit(RenderCommand::FitBounds { bounds });
        }
    }

    fn push_status(&mut self) {
        self.surface.submit(RenderCommand::SetStatus {
            status: self.status.clone(),
        });
    }
}

fn waypoint_bounds(waypoints: &[Waypoint]) -> Option<GeoBounds> {
    GeoBounds::from_points(waypoints.iter().map(Waypoint::coord))
}
