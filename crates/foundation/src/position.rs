use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::LatLon;

/// A vehicle fix: where it was and when.
///
/// Positions are immutable once built; a newer fix supersedes an older one
/// rather than being edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    coord: LatLon,
    observed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accuracy_m: Option<f64>,
}

impl Position {
    pub fn new(coord: LatLon, observed_at: DateTime<Utc>) -> Self {
        Self {
            coord,
            observed_at,
            accuracy_m: None,
        }
    }

    /// Same fix with a horizontal accuracy radius attached. Negative or
    /// non-finite radii are dropped.
    pub fn with_accuracy(mut self, accuracy_m: Option<f64>) -> Self {
        self.accuracy_m = accuracy_m.filter(|m| m.is_finite() && *m >= 0.0);
        self
    }

    pub fn coord(&self) -> LatLon {
        self.coord
    }

    pub fn latitude(&self) -> f64 {
        self.coord.lat
    }

    pub fn longitude(&self) -> f64 {
        self.coord.lon
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn accuracy_m(&self) -> Option<f64> {
        self.accuracy_m
    }

    /// True when `self` was observed strictly before `other`.
    pub fn is_older_than(&self, other: &Position) -> bool {
        self.observed_at < other.observed_at
    }

    /// Same place at the same instant.
    pub fn same_fix(&self, other: &Position) -> bool {
        self.coord == other.coord && self.observed_at == other.observed_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::Position;
    use crate::geo::LatLon;

    #[test]
    fn ordering_by_observation_time() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        let a = Position::new(LatLon::new(34.0, -118.0), t0);
        let b = Position::new(LatLon::new(34.1, -118.1), t1);
        assert!(a.is_older_than(&b));
        assert!(!b.is_older_than(&a));
        assert!(!a.is_older_than(&a));
    }

    #[test]
    fn same_fix_ignores_accuracy() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let a = Position::new(LatLon::new(1.0, 2.0), t).with_accuracy(Some(5.0));
        let b = Position::new(LatLon::new(1.0, 2.0), t);
        assert!(a.same_fix(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_accuracy_is_dropped() {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        let p = Position::new(LatLon::new(0.0, 0.0), t).with_accuracy(Some(-3.0));
        assert_eq!(p.accuracy_m(), None);
        let p = p.with_accuracy(Some(f64::NAN));
        assert_eq!(p.accuracy_m(), None);
    }
}
