//! Routing collaborator seam.
//!
//! The route cache only ever talks to a `RoutingService`. Implementations:
//! - `OsrmRouter`: OSRM HTTP route API (see `osrm.rs`)
//! - `StraightLineRouter`: offline fallback joining waypoints directly

use std::future::Future;
use std::pin::Pin;

use foundation::Waypoint;

use crate::route::RouteGeometry;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error raised by a routing collaborator.
#[derive(Debug)]
pub struct RoutingError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for RoutingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RoutingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl RoutingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Something that turns an ordered waypoint list into path geometry.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait RoutingService: Send + Sync {
    fn name(&self) -> &str;

    /// Request the path through `waypoints` in order.
    fn route<'a>(
        &'a self,
        waypoints: &'a [Waypoint],
    ) -> BoxFuture<'a, Result<RouteGeometry, RoutingError>>;
}

/// Offline router: straight segments between consecutive waypoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct StraightLineRouter;

impl RoutingService for StraightLineRouter {
    fn name(&self) -> &str {
        "straight-line"
    }

    fn route<'a>(
        &'a self,
        waypoints: &'a [Waypoint],
    ) -> BoxFuture<'a, Result<RouteGeometry, RoutingError>> {
        Box::pin(async move {
            if waypoints.len() < 2 {
                return Err(RoutingError::new("need at least two waypoints"));
            }
            let mut geometry = RouteGeometry::new(waypoints.iter().map(|w| w.coord()).collect());
            geometry.distance_m = Some(geometry.length_m());
            Ok(geometry)
        })
    }
}
