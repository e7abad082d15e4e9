use std::fmt;

use foundation::math::path_length_m;
use foundation::{GeoBounds, LatLon, Waypoint};
use serde::{Serialize, Serializer};

/// Identity of an ordered waypoint set.
///
/// A blake3 hash over the waypoint coordinates in order. Labels do not
/// participate: relabelling a waypoint does not change the route.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteKey([u8; 32]);

impl RouteKey {
    pub fn for_waypoints(waypoints: &[Waypoint]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(waypoints.len() as u64).to_le_bytes());
        for w in waypoints {
            let c = w.coord();
            // Adding 0.0 folds -0.0 into 0.0 so both hash the same.
            hasher.update(&(c.lat + 0.0).to_bits().to_le_bytes());
            hasher.update(&(c.lon + 0.0).to_bits().to_le_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// First 16 hex characters; enough to tell keys apart in logs.
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(16);
        s
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", blake3::Hash::from(self.0).to_hex())
    }
}

impl Serialize for RouteKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Path geometry as returned by a routing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteGeometry {
    pub points: Vec<LatLon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

impl RouteGeometry {
    pub fn new(points: Vec<LatLon>) -> Self {
        Self {
            points,
            distance_m: None,
            duration_s: None,
        }
    }

    /// Reported distance, or the great-circle length of the polyline.
    pub fn length_m(&self) -> f64 {
        self.distance_m
            .unwrap_or_else(|| path_length_m(&self.points))
    }
}

/// A routed path for one waypoint set. Built once per key by the route cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    key: RouteKey,
    waypoints: Vec<Waypoint>,
    #[serde(flatten)]
    geometry: RouteGeometry,
}

impl Route {
    pub fn new(waypoints: Vec<Waypoint>, geometry: RouteGeometry) -> Self {
        Self {
            key: RouteKey::for_waypoints(&waypoints),
            waypoints,
            geometry,
        }
    }

    pub fn key(&self) -> RouteKey {
        self.key
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn points(&self) -> &[LatLon] {
        &self.geometry.points
    }

    pub fn geometry(&self) -> &RouteGeometry {
        &self.geometry
    }

    pub fn distance_m(&self) -> Option<f64> {
        self.geometry.distance_m
    }

    pub fn duration_s(&self) -> Option<f64> {
        self.geometry.duration_s
    }

    pub fn bounds(&self) -> Option<GeoBounds> {
        GeoBounds::from_points(self.points().iter().copied())
    }

    /// True when this route was built for exactly `waypoints`.
    pub fn matches(&self, waypoints: &[Waypoint]) -> bool {
        self.key == RouteKey::for_waypoints(waypoints)
    }
}

#[cfg(test)]
mod tests {
    use super::{Route, RouteGeometry, RouteKey};
    use foundation::{LatLon, Waypoint};

    fn la_riverside() -> Vec<Waypoint> {
        vec![Waypoint::new(34.05, -118.24), Waypoint::new(33.95, -117.40)]
    }

    #[test]
    fn key_is_stable_and_order_sensitive() {
        let w = la_riverside();
        assert_eq!(RouteKey::for_waypoints(&w), RouteKey::for_waypoints(&w.clone()));

        let reversed: Vec<_> = w.iter().rev().cloned().collect();
        assert_ne!(RouteKey::for_waypoints(&w), RouteKey::for_waypoints(&reversed));
    }

    #[test]
    fn key_ignores_labels_and_signed_zero() {
        let a = vec![Waypoint::new(0.0, 10.0), Waypoint::new(1.0, 11.0)];
        let b = vec![
            Waypoint::labeled(-0.0, 10.0, "start"),
            Waypoint::labeled(1.0, 11.0, "end"),
        ];
        assert_eq!(RouteKey::for_waypoints(&a), RouteKey::for_waypoints(&b));
    }

    #[test]
    fn key_hex_forms() {
        let key = RouteKey::for_waypoints(&la_riverside());
        assert_eq!(key.to_string().len(), 64);
        assert_eq!(key.short().len(), 16);
        assert!(key.to_string().starts_with(&key.short()));
    }

    #[test]
    fn route_matches_its_waypoints() {
        let w = la_riverside();
        let route = Route::new(
            w.clone(),
            RouteGeometry::new(w.iter().map(|w| w.coord()).collect()),
        );
        assert!(route.matches(&w));
        assert!(!route.matches(&w[..1]));
        let b = route.bounds().unwrap();
        assert!(b.contains(LatLon::new(34.0, -118.0)));
    }

    #[test]
    fn length_falls_back_to_polyline() {
        let g = RouteGeometry::new(vec![LatLon::new(0.0, 0.0), LatLon::new(0.0, 1.0)]);
        assert!((g.length_m() - 111_195.0).abs() < 5.0);

        let mut g = g;
        g.distance_m = Some(123.0);
        assert_eq!(g.length_m(), 123.0);
    }
}
