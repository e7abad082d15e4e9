use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Geographic coordinate in decimal degrees (WGS84).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Returns the coordinate unchanged if it lies on the globe.
    pub fn validate(self) -> Result<Self, GeoError> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(GeoError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(GeoError::LatitudeOutOfRange(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(GeoError::LongitudeOutOfRange(self.lon));
        }
        Ok(self)
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeoError {
    NonFinite,
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
    Parse(String),
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoError::NonFinite => write!(f, "coordinate is not finite"),
            GeoError::LatitudeOutOfRange(lat) => {
                write!(f, "latitude {lat} outside [-90, 90]")
            }
            GeoError::LongitudeOutOfRange(lon) => {
                write!(f, "longitude {lon} outside [-180, 180]")
            }
            GeoError::Parse(msg) => write!(f, "invalid coordinate: {msg}"),
        }
    }
}

impl std::error::Error for GeoError {}

/// A fixed point the route has to pass through. Defined at configuration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(flatten)]
    coord: LatLon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            coord: LatLon::new(lat, lon),
            label: None,
        }
    }

    pub fn labeled(lat: f64, lon: f64, label: impl Into<String>) -> Self {
        Self {
            coord: LatLon::new(lat, lon),
            label: Some(label.into()),
        }
    }

    pub fn coord(&self) -> LatLon {
        self.coord
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

/// Parses `lat,lon` or `lat,lon,label`.
impl FromStr for Waypoint {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ',');
        let lat = parse_degrees(parts.next(), "latitude")?;
        let lon = parse_degrees(parts.next(), "longitude")?;
        let coord = LatLon::new(lat, lon).validate()?;
        let label = parts
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        Ok(Self { coord, label })
    }
}

fn parse_degrees(raw: Option<&str>, what: &str) -> Result<f64, GeoError> {
    let raw = raw
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| GeoError::Parse(format!("missing {what}")))?;
    raw.parse::<f64>()
        .map_err(|_| GeoError::Parse(format!("{what} '{raw}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::{GeoError, LatLon, Waypoint};

    #[test]
    fn validates_ranges() {
        assert!(LatLon::new(34.05, -118.24).is_valid());
        assert!(LatLon::new(90.0, 180.0).is_valid());
        assert_eq!(
            LatLon::new(91.0, 0.0).validate(),
            Err(GeoError::LatitudeOutOfRange(91.0))
        );
        assert_eq!(
            LatLon::new(0.0, -181.0).validate(),
            Err(GeoError::LongitudeOutOfRange(-181.0))
        );
        assert_eq!(
            LatLon::new(f64::NAN, 0.0).validate(),
            Err(GeoError::NonFinite)
        );
    }

    #[test]
    fn parses_waypoint_with_and_without_label() {
        let w: Waypoint = "34.05,-118.24".parse().unwrap();
        assert_eq!(w.coord(), LatLon::new(34.05, -118.24));
        assert_eq!(w.label(), None);

        let w: Waypoint = " 33.95 , -117.40 , Riverside, CA".parse().unwrap();
        assert_eq!(w.coord(), LatLon::new(33.95, -117.40));
        assert_eq!(w.label(), Some("Riverside, CA"));
    }

    #[test]
    fn rejects_malformed_waypoints() {
        assert!(matches!("34.05".parse::<Waypoint>(), Err(GeoError::Parse(_))));
        assert!(matches!("abc,1".parse::<Waypoint>(), Err(GeoError::Parse(_))));
        assert!(matches!(
            "95,1".parse::<Waypoint>(),
            Err(GeoError::LatitudeOutOfRange(_))
        ));
    }

    #[test]
    fn waypoint_serializes_flat() {
        let w = Waypoint::labeled(1.0, 2.0, "depot");
        let v = serde_json::to_value(&w).unwrap();
        assert_eq!(v, serde_json::json!({ "lat": 1.0, "lon": 2.0, "label": "depot" }));

        let back: Waypoint = serde_json::from_value(serde_json::json!({ "lat": 1.0, "lon": 2.0 }))
            .unwrap();
        assert_eq!(back, Waypoint::new(1.0, 2.0));
    }
}
