//! OSRM route API client.
//!
//! Request: `{base}/route/v1/{profile}/{lon,lat;lon,lat;...}?overview=full&geometries=geojson`
//! Response: `{ "code": "Ok", "routes": [{ "geometry": { "coordinates": [[lon, lat], ...] },
//! "distance": m, "duration": s }] }`. Any other `code` is an error.

use std::time::Duration;

use foundation::{LatLon, Waypoint};
use serde::Deserialize;
use tracing::debug;

use crate::route::RouteGeometry;
use crate::routing::{BoxFuture, RoutingError, RoutingService};

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Parse an OSRM route response body into geometry.
pub fn parse_osrm_response(body: &str) -> Result<RouteGeometry, RoutingError> {
    let resp: OsrmResponse = serde_json::from_str(body)
        .map_err(|e| RoutingError::with_source("malformed OSRM response", e))?;

    if resp.code != "Ok" {
        let detail = resp.message.unwrap_or_default();
        return Err(RoutingError::new(format!(
            "OSRM returned {}{}{}",
            resp.code,
            if detail.is_empty() { "" } else { ": " },
            detail
        )));
    }

    let Some(route) = resp.routes.into_iter().next() else {
        return Err(RoutingError::new("OSRM returned no routes"));
    };

    let points: Vec<LatLon> = route
        .geometry
        .coordinates
        .into_iter()
        .map(|[lon, lat]| LatLon::new(lat, lon))
        .collect();

    if points.len() < 2 {
        return Err(RoutingError::new(format!(
            "OSRM route has {} point(s), need at least 2",
            points.len()
        )));
    }
    if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
        return Err(RoutingError::new(format!("OSRM route has invalid point {bad}")));
    }

    Ok(RouteGeometry {
        points,
        distance_m: route.distance,
        duration_s: route.duration,
    })
}

/// HTTP routing collaborator speaking the OSRM route API.
pub struct OsrmRouter {
    base_url: String,
    profile: String,
    client: reqwest::Client,
}

impl OsrmRouter {
    pub const DEFAULT_BASE_URL: &'static str = "https://router.project-osrm.org";
    pub const DEFAULT_PROFILE: &'static str = "driving";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: impl Into<String>) -> Result<Self, RoutingError> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RoutingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RoutingError::with_source("failed to build HTTP client", e))?;
        Ok(Self {
            base_url: base_url.into(),
            profile: Self::DEFAULT_PROFILE.to_string(),
            client,
        })
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn route_url(&self, waypoints: &[Waypoint]) -> String {
        let coords = waypoints
            .iter()
            .map(|w| format!("{},{}", w.coord().lon, w.coord().lat))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=geojson",
            self.base_url.trim_end_matches('/'),
            self.profile,
            coords
        )
    }
}

impl RoutingService for OsrmRouter {
    fn name(&self) -> &str {
        "osrm"
    }

    fn route<'a>(
        &'a self,
        waypoints: &'a [Waypoint],
    ) -> BoxFuture<'a, Result<RouteGeometry, RoutingError>> {
        let url = self.route_url(waypoints);
        Box::pin(async move {
            debug!("OSRM request: {url}");
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| RoutingError::with_source("OSRM request failed", e))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| RoutingError::with_source("failed to read OSRM response", e))?;

            // OSRM reports routing failures (NoRoute, InvalidInput) as 4xx with a JSON body.
            match parse_osrm_response(&body) {
                Ok(geometry) => Ok(geometry),
                Err(err) if status.is_success() => Err(err),
                Err(err) => Err(RoutingError::new(format!("HTTP {status}: {}", err.message))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_osrm_response, OsrmRouter};
    use foundation::{LatLon, Waypoint};

    #[test]
    fn builds_lon_lat_url() {
        let router = OsrmRouter::new("http://localhost:5000/").unwrap();
        let url = router.route_url(&[Waypoint::new(34.05, -118.24), Waypoint::new(33.95, -117.4)]);
        assert_eq!(
            url,
            "http://localhost:5000/route/v1/driving/-118.24,34.05;-117.4,33.95?overview=full&geometries=geojson"
        );
    }

    #[test]
    fn profile_is_configurable() {
        let router = OsrmRouter::new("http://r").unwrap().with_profile("bike");
        assert!(router
            .route_url(&[Waypoint::new(0.0, 0.0), Waypoint::new(1.0, 1.0)])
            .starts_with("http://r/route/v1/bike/"));
    }

    #[test]
    fn parses_geojson_geometry() {
        let body = r#"{
            "code": "Ok",
            "routes": [{
                "geometry": { "type": "LineString", "coordinates": [[-118.24, 34.05], [-117.9, 34.0], [-117.4, 33.95]] },
                "distance": 81234.5,
                "duration": 3600.0
            }],
            "waypoints": []
        }"#;
        let g = parse_osrm_response(body).unwrap();
        assert_eq!(g.points.len(), 3);
        assert_eq!(g.points[0], LatLon::new(34.05, -118.24));
        assert_eq!(g.distance_m, Some(81234.5));
        assert_eq!(g.duration_s, Some(3600.0));
    }

    #[test]
    fn rejects_non_ok_code() {
        let body = r#"{ "code": "NoRoute", "message": "Impossible route between points" }"#;
        let err = parse_osrm_response(body).unwrap_err();
        assert_eq!(err.message, "OSRM returned NoRoute: Impossible route between points");
    }

    #[test]
    fn rejects_empty_and_degenerate_routes() {
        assert!(parse_osrm_response(r#"{ "code": "Ok", "routes": [] }"#).is_err());
        let single = r#"{ "code": "Ok", "routes": [{ "geometry": { "coordinates": [[0.0, 0.0]] } }] }"#;
        assert!(parse_osrm_response(single).is_err());
        assert!(parse_osrm_response("<html>bad gateway</html>").is_err());
    }
}
