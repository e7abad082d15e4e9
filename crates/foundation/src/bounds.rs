use serde::{Deserialize, Serialize};

use crate::geo::LatLon;

/// Geographic bounding box. Does not handle antimeridian wrapping.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn around(p: LatLon) -> Self {
        Self {
            south: p.lat,
            west: p.lon,
            north: p.lat,
            east: p.lon,
        }
    }

    /// Smallest box containing every point, or `None` when there are none.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = LatLon>,
    {
        let mut iter = points.into_iter();
        let mut bounds = Self::around(iter.next()?);
        for p in iter {
            bounds.extend(p);
        }
        Some(bounds)
    }

    pub fn extend(&mut self, p: LatLon) {
        self.south = self.south.min(p.lat);
        self.north = self.north.max(p.lat);
        self.west = self.west.min(p.lon);
        self.east = self.east.max(p.lon);
    }

    pub fn union(mut self, other: GeoBounds) -> Self {
        self.extend(LatLon::new(other.south, other.west));
        self.extend(LatLon::new(other.north, other.east));
        self
    }

    pub fn contains(&self, p: LatLon) -> bool {
        (self.south..=self.north).contains(&p.lat) && (self.west..=self.east).contains(&p.lon)
    }
}
